//! Wire types for the venue capability interface.
//!
//! These mirror the shapes the exchange SDK exposes (sides, fill modes,
//! book prices, open orders, fills, atomic subactions) but carry only what
//! the core consumes. Prices and sizes are `Decimal` end to end.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ask,
    Bid,
}

impl Side {
    /// The opposite side.
    pub fn flip(self) -> Self {
        match self {
            Side::Ask => Side::Bid,
            Side::Bid => Side::Ask,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Ask => write!(f, "ask"),
            Side::Bid => write!(f, "bid"),
        }
    }
}

/// How an order is allowed to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillMode {
    Limit,
    PostOnly,
    ImmediateOrCancel,
    FillOrKill,
}

/// A mid-price sample from a price feed or the venue book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidPrice {
    /// Arithmetic mean of `best_bid` and `best_ask`.
    pub mid: Decimal,
    /// Highest resting bid price.
    pub best_bid: Decimal,
    /// Lowest resting ask price.
    pub best_ask: Decimal,
    /// Unix epoch milliseconds when the sample was taken.
    pub timestamp_ms: u64,
}

/// Best bid and best ask prices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBO {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
}

impl MidPrice {
    /// The best-bid/best-ask pair of this sample.
    pub fn bbo(&self) -> BBO {
        BBO {
            best_bid: self.best_bid,
            best_ask: self.best_ask,
        }
    }
}

/// An order resting on the venue, as reported by `fetch_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: u64,
    pub market_id: u32,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// A signed perp position, as reported by `fetch_info`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerpPosition {
    pub market_id: u32,
    /// Positive = long, negative = short.
    pub base_size: Decimal,
}

/// Authoritative account snapshot from the venue.
#[derive(Debug, Clone, Default)]
pub struct AccountInfo {
    pub orders: Vec<OpenOrder>,
    pub positions: Vec<PerpPosition>,
}

impl AccountInfo {
    /// Open orders for one market.
    pub fn market_orders(&self, market_id: u32) -> Vec<OpenOrder> {
        self.orders
            .iter()
            .filter(|o| o.market_id == market_id)
            .cloned()
            .collect()
    }

    /// Signed position for one market (zero if absent).
    pub fn market_position(&self, market_id: u32) -> Decimal {
        self.positions
            .iter()
            .find(|p| p.market_id == market_id)
            .map(|p| p.base_size)
            .unwrap_or_default()
    }
}

/// A fill reported by the venue account stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEvent {
    pub market_id: u32,
    /// Side of *our* resting order: a bid fill buys base, an ask fill sells.
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// An individual subaction within an atomic venue operation.
#[derive(Debug, Clone)]
pub enum AtomicSubaction {
    Place {
        market_id: u32,
        side: Side,
        fill_mode: FillMode,
        is_reduce_only: bool,
        price: Decimal,
        size: Decimal,
    },
    Cancel {
        order_id: u64,
    },
}

/// Per-subaction result of a successful atomic operation, in submission order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubactionResult {
    Placed { order_id: u64 },
    Cancelled { order_id: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_flip() {
        assert_eq!(Side::Bid.flip(), Side::Ask);
        assert_eq!(Side::Ask.flip(), Side::Bid);
    }

    #[test]
    fn test_account_info_market_filters() {
        let info = AccountInfo {
            orders: vec![
                OpenOrder {
                    order_id: 1,
                    market_id: 1,
                    side: Side::Bid,
                    price: dec!(100),
                    size: dec!(0.5),
                },
                OpenOrder {
                    order_id: 2,
                    market_id: 2,
                    side: Side::Ask,
                    price: dec!(200),
                    size: dec!(0.5),
                },
            ],
            positions: vec![PerpPosition {
                market_id: 2,
                base_size: dec!(-1.25),
            }],
        };
        assert_eq!(info.market_orders(1).len(), 1);
        assert_eq!(info.market_orders(1)[0].order_id, 1);
        assert_eq!(info.market_position(2), dec!(-1.25));
        assert_eq!(info.market_position(1), Decimal::ZERO);
    }

    #[test]
    fn test_mid_price_bbo() {
        let mid = MidPrice {
            mid: dec!(100.5),
            best_bid: dec!(100),
            best_ask: dec!(101),
            timestamp_ms: 1,
        };
        let bbo = mid.bbo();
        assert_eq!(bbo.best_bid, dec!(100));
        assert_eq!(bbo.best_ask, dec!(101));
    }
}
