use rust_decimal::Decimal;
use serde::Deserialize;

use crate::venue::Side;

/// Binance bookTicker payload.
///
/// Field names match the Binance API:
///   e  = event type
///   E  = event time (ms)
///   T  = transaction time (ms)
///   s  = symbol
///   b  = best bid price (string)
///   B  = best bid qty (string)
///   a  = best ask price (string)
///   A  = best ask qty (string)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct BookTickerMsg {
    #[serde(default)]
    pub e: String,
    #[serde(default)]
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(default)]
    #[serde(rename = "T")]
    pub transaction_time: u64,
    pub s: String,
    pub b: String,
    #[serde(rename = "B")]
    pub bid_qty: String,
    pub a: String,
    #[serde(rename = "A")]
    pub ask_qty: String,
}

/// A desired resting order: side, price, and size.
///
/// Prices are tick-aligned and sizes lot-aligned by the quoter before a
/// `Quote` is ever constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}
