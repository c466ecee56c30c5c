//! Reference-exchange (Binance Futures) WebSocket price feed.
//!
//! Publishes [`MidPrice`] via a `watch` channel for consumption by the
//! market-maker loop. A background task owns the socket and reconnects with a
//! fixed delay; connection liveness (ping cadence, pong deadlines, idle
//! detection) is tracked by a small [`Heartbeat`] state machine polled from a
//! single housekeeping interval. Book ticker prices arrive as strings and are
//! parsed straight into `Decimal`.

use std::str::FromStr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::MmError;
use crate::types::BookTickerMsg;
use crate::venue::MidPrice;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const STALE_THRESHOLD: Duration = Duration::from_secs(60);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const BINANCE_FUTURES_WS: &str = "wss://fstream.binance.com/ws";

/// Live Binance Futures mid-price, published via `watch` channel.
pub struct ReferencePriceFeed {
    price_tx: watch::Sender<Option<MidPrice>>,
    price_rx: watch::Receiver<Option<MidPrice>>,
    cancel: CancellationToken,
    ws_url: String,
}

impl ReferencePriceFeed {
    /// Create a new feed for the given lowercase symbol (e.g. `"btcusdt"`).
    ///
    /// Does **not** connect yet — call [`connect`](Self::connect) to start.
    pub fn new(symbol: &str) -> Self {
        let (price_tx, price_rx) = watch::channel(None);
        let ws_url = format!("{BINANCE_FUTURES_WS}/{symbol}@bookTicker");
        Self {
            price_tx,
            price_rx,
            cancel: CancellationToken::new(),
            ws_url,
        }
    }

    /// Start the background WebSocket task (connect + reconnect until closed).
    pub fn connect(&self) {
        let url = self.ws_url.clone();
        let tx = self.price_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            info!(url = %url, "reference feed task started");
            while !cancel.is_cancelled() {
                match pump_prices(&url, &tx, &cancel).await {
                    // Graceful close (shutdown requested).
                    Ok(()) => break,
                    Err(e) => {
                        error!(error = %e, "reference feed disconnected");
                        tokio::select! {
                            _ = time::sleep(RECONNECT_DELAY) => {}
                            _ = cancel.cancelled() => break,
                        }
                    }
                }
            }
            info!("reference feed task ended");
        });
    }

    /// Latest mid-price snapshot (lock-free read).
    pub fn mid_price(&self) -> Option<MidPrice> {
        *self.price_rx.borrow()
    }

    /// Subscribe to price updates.
    pub fn subscribe_price(&self) -> watch::Receiver<Option<MidPrice>> {
        self.price_rx.clone()
    }

    /// Gracefully shut down the background task.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// One socket lifetime: read frames into the watch channel until the
/// connection dies, goes quiet, or shutdown is requested.
async fn pump_prices(
    url: &str,
    tx: &watch::Sender<Option<MidPrice>>,
    cancel: &CancellationToken,
) -> Result<(), MmError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws_stream.split();
    info!("reference feed connected");

    let mut liveness = Heartbeat::new(Instant::now());
    let mut housekeeping = time::interval(HOUSEKEEPING_INTERVAL);
    housekeeping.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }

            // Liveness policy runs on one coarse timer: verdict first, then
            // decide whether a ping is owed.
            _ = housekeeping.tick() => {
                let now = Instant::now();
                liveness.verdict(now)?;
                if liveness.ping_due(now) {
                    sink.send(Message::Ping(vec![])).await?;
                    liveness.mark_ping(now);
                }
            }

            frame = stream.next() => {
                let Some(frame) = frame else {
                    return Err(MmError::ConnectionClosed);
                };
                let msg = frame?;
                liveness.saw_frame(Instant::now());
                match msg {
                    Message::Text(text) => {
                        if let Some(mid) = parse_book_ticker(&text) {
                            let _ = tx.send(Some(mid));
                        }
                    }
                    Message::Ping(payload) => sink.send(Message::Pong(payload)).await?,
                    Message::Pong(_) => liveness.saw_pong(Instant::now()),
                    Message::Close(_) => return Err(MmError::ConnectionClosed),
                    _ => {}
                }
            }
        }
    }
}

/// Connection liveness bookkeeping.
///
/// Tracks when the last frame arrived, when the last ping went out, and
/// whether a pong is outstanding. All methods take the current instant so
/// the policy is deterministic under test.
struct Heartbeat {
    last_frame: Instant,
    last_ping: Instant,
    pong_due_by: Option<Instant>,
}

impl Heartbeat {
    fn new(now: Instant) -> Self {
        Self {
            last_frame: now,
            last_ping: now,
            pong_due_by: None,
        }
    }

    fn saw_frame(&mut self, now: Instant) {
        self.last_frame = now;
    }

    fn saw_pong(&mut self, now: Instant) {
        self.last_frame = now;
        self.pong_due_by = None;
    }

    fn ping_due(&self, now: Instant) -> bool {
        now.duration_since(self.last_ping) >= PING_INTERVAL
    }

    fn mark_ping(&mut self, now: Instant) {
        self.last_ping = now;
        // An already-armed deadline stays; the peer owes us the older pong.
        if self.pong_due_by.is_none() {
            self.pong_due_by = Some(now + PONG_TIMEOUT);
        }
    }

    /// Dead-connection verdict: an overdue pong or a long-idle socket ends
    /// the connection so the outer loop can redial.
    fn verdict(&self, now: Instant) -> Result<(), MmError> {
        if self.pong_due_by.is_some_and(|due| now >= due) {
            return Err(MmError::PongTimeout);
        }
        let idle = now.duration_since(self.last_frame);
        if idle >= STALE_THRESHOLD {
            return Err(MmError::StaleConnection(idle.as_millis() as u64));
        }
        Ok(())
    }
}

/// Parse a Binance bookTicker JSON into a [`MidPrice`].
///
/// Returns `None` on parse failure (logged at debug level).
fn parse_book_ticker(text: &str) -> Option<MidPrice> {
    let msg: BookTickerMsg = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "failed to parse book ticker");
            return None;
        }
    };
    let best_bid = Decimal::from_str(&msg.b).ok()?;
    let best_ask = Decimal::from_str(&msg.a).ok()?;
    let mid = (best_bid + best_ask) / Decimal::TWO;
    Some(MidPrice {
        mid,
        best_bid,
        best_ask,
        timestamp_ms: epoch_ms(),
    })
}

/// Current wall-clock time in epoch milliseconds.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_book_ticker_to_mid_price() {
        let json = r#"{"s":"BTCUSDT","b":"50000.00","a":"50010.00","B":"1.5","A":"2.0"}"#;
        let mid = parse_book_ticker(json).unwrap();
        assert_eq!(mid.best_bid, dec!(50000.00));
        assert_eq!(mid.best_ask, dec!(50010.00));
        assert_eq!(mid.mid, dec!(50005));
        assert!(mid.timestamp_ms > 0);
    }

    #[test]
    fn test_mid_price_is_exact_decimal() {
        // (3000.50 + 3001.51) / 2 = 3001.005 with no float noise.
        let json = r#"{"s":"ETHUSDT","b":"3000.50","a":"3001.51","B":"10","A":"10"}"#;
        let mid = parse_book_ticker(json).unwrap();
        assert_eq!(mid.mid, dec!(3001.005));
    }

    #[test]
    fn test_parse_invalid_json_returns_none() {
        assert!(parse_book_ticker("not json").is_none());
    }

    #[test]
    fn test_parse_unparseable_price_returns_none() {
        let json = r#"{"s":"BTCUSDT","b":"invalid","a":"50010.00","B":"1","A":"1"}"#;
        assert!(parse_book_ticker(json).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_fresh_connection_is_healthy() {
        let now = Instant::now();
        let hb = Heartbeat::new(now);
        assert!(hb.verdict(now).is_ok());
        assert!(!hb.ping_due(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ping_cadence() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(start);
        assert!(!hb.ping_due(start + PING_INTERVAL - Duration::from_secs(1)));
        let t1 = start + PING_INTERVAL;
        assert!(hb.ping_due(t1));
        hb.mark_ping(t1);
        assert!(!hb.ping_due(t1 + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pong_timeout() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(start);
        hb.mark_ping(start);
        // A frame keeps the socket non-idle but is not a pong.
        hb.saw_frame(start + Duration::from_secs(5));
        assert!(matches!(
            hb.verdict(start + PONG_TIMEOUT),
            Err(MmError::PongTimeout)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pong_clears_deadline() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(start);
        hb.mark_ping(start);
        hb.saw_pong(start + Duration::from_secs(2));
        assert!(hb.verdict(start + PONG_TIMEOUT + Duration::from_secs(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stale_when_idle() {
        let start = Instant::now();
        let hb = Heartbeat::new(start);
        let verdict = hb.verdict(start + STALE_THRESHOLD);
        match verdict {
            Err(MmError::StaleConnection(ms)) => assert_eq!(ms, STALE_THRESHOLD.as_millis() as u64),
            other => panic!("expected stale connection, got {other:?}"),
        }
    }
}
