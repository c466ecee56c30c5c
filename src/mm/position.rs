//! Position ledger with optimistic fill updates and periodic server sync.
//!
//! The signed base position is updated optimistically from fill events and
//! periodically corrected against the venue's authoritative snapshot by a
//! background tokio task. The position is a `Decimal` (sizes never touch
//! binary floating point) behind a `std::sync::Mutex`; critical sections are
//! a single copy.

use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::venue::{fetch_info_with_retry, Side, VenueClient};

/// Drift beyond which the server value is adopted.
const DRIFT_THRESHOLD: Decimal = dec!(0.0001);

/// Configuration for the position ledger.
#[derive(Debug, Clone)]
pub struct PositionConfig {
    /// Position USD value that triggers close (reduce-only) mode.
    pub close_threshold_usd: Decimal,
    /// Interval between server syncs in milliseconds.
    pub sync_interval_ms: u64,
}

/// Snapshot of current position state.
#[derive(Debug, Clone)]
pub struct PositionState {
    /// Signed base-asset size (positive = long, negative = short).
    pub size_base: Decimal,
    /// Position value in USD (`size_base * fair_price`).
    pub size_usd: Decimal,
    /// Whether the position is net long.
    pub is_long: bool,
    /// Whether position USD exceeds the close threshold.
    pub is_close_mode: bool,
}

/// Context passed to the quoter for computing quotes.
#[derive(Debug, Clone)]
pub struct QuotingContext {
    /// Current fair price used for quoting.
    pub fair_price: Decimal,
    /// Current position state snapshot.
    pub position_state: PositionState,
    /// Which sides the quoter is allowed to quote.
    pub allowed_sides: Vec<Side>,
}

/// Shared position ledger.
pub struct PositionLedger {
    config: PositionConfig,
    base_size: Arc<Mutex<Decimal>>,
}

impl PositionLedger {
    /// Create a new ledger (position starts at zero).
    pub fn new(config: PositionConfig) -> Self {
        Self {
            config,
            base_size: Arc::new(Mutex::new(Decimal::ZERO)),
        }
    }

    /// Spawn a background task that periodically syncs position from the venue.
    ///
    /// Each sync uses bounded exponential-backoff retry; on exhaustion the
    /// prior local value is retained until the next interval.
    pub fn start_sync(
        &self,
        venue: Arc<dyn VenueClient>,
        market_id: u32,
        cancel: CancellationToken,
    ) {
        let base_size = Arc::clone(&self.base_size);
        let interval_ms = self.config.sync_interval_ms;

        tokio::spawn(async move {
            // Sync once immediately before entering the loop.
            sync_from_server(venue.as_ref(), market_id, &base_size).await;

            let mut interval = time::interval(Duration::from_millis(interval_ms));
            interval.tick().await; // consume immediate tick

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        sync_from_server(venue.as_ref(), market_id, &base_size).await;
                    }
                    _ = cancel.cancelled() => {
                        debug!("position sync stopped");
                        return;
                    }
                }
            }
        });
    }

    /// Optimistically update position after a fill.
    ///
    /// Bid fills increase position (buying base), ask fills decrease it.
    pub fn apply_fill(&self, side: Side, size: Decimal) {
        let mut pos = self.base_size.lock().unwrap_or_else(|e| e.into_inner());
        *pos = match side {
            Side::Bid => *pos + size,
            Side::Ask => *pos - size,
        };
        debug!(side = %side, %size, new_pos = %*pos, "position updated from fill");
    }

    /// Build a [`QuotingContext`] from the current position and a fair price.
    pub fn quoting_context(&self, fair_price: Decimal) -> QuotingContext {
        let state = self.state(fair_price);
        let allowed_sides = allowed_sides(&state);
        QuotingContext {
            fair_price,
            position_state: state,
            allowed_sides,
        }
    }

    /// Current signed base-asset position.
    pub fn base_size(&self) -> Decimal {
        *self.base_size.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the current position triggers close mode at the given price.
    pub fn is_close_mode(&self, fair_price: Decimal) -> bool {
        let usd = (self.base_size() * fair_price).abs();
        usd >= self.config.close_threshold_usd
    }

    /// Build a [`PositionState`] from current base size and a fair price.
    pub fn state(&self, fair_price: Decimal) -> PositionState {
        let size_base = self.base_size();
        let size_usd = size_base * fair_price;
        let is_long = size_base > Decimal::ZERO;
        let is_close_mode = size_usd.abs() >= self.config.close_threshold_usd;
        PositionState {
            size_base,
            size_usd,
            is_long,
            is_close_mode,
        }
    }
}

/// Determine which sides the quoter may trade given the position state.
///
/// Close mode restricts quoting to the reducing side only.
fn allowed_sides(state: &PositionState) -> Vec<Side> {
    if state.is_close_mode {
        if state.is_long {
            vec![Side::Ask]
        } else {
            vec![Side::Bid]
        }
    } else {
        vec![Side::Bid, Side::Ask]
    }
}

/// Fetch the authoritative position (with bounded backoff) and correct drift.
async fn sync_from_server(venue: &dyn VenueClient, market_id: u32, base_size: &Mutex<Decimal>) {
    let Some(info) = fetch_info_with_retry(venue, "position").await else {
        return;
    };
    let server_size = info.market_position(market_id);
    let mut local = base_size.lock().unwrap_or_else(|e| e.into_inner());
    if (*local - server_size).abs() > DRIFT_THRESHOLD {
        warn!(
            local = %*local,
            server = %server_size,
            "position drift detected — correcting"
        );
        *local = server_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::paper::PaperVenue;

    fn ledger(threshold: Decimal) -> PositionLedger {
        PositionLedger::new(PositionConfig {
            close_threshold_usd: threshold,
            sync_interval_ms: 5000,
        })
    }

    #[test]
    fn test_apply_fill_bid_increases_position() {
        let t = ledger(dec!(100));
        t.apply_fill(Side::Bid, dec!(1.5));
        assert_eq!(t.base_size(), dec!(1.5));
    }

    #[test]
    fn test_apply_fill_ask_decreases_position() {
        let t = ledger(dec!(100));
        t.apply_fill(Side::Ask, dec!(0.5));
        assert_eq!(t.base_size(), dec!(-0.5));
    }

    #[test]
    fn test_fill_sequence_is_exact() {
        // 0.1 ten times must be exactly 1.0 (no binary float drift).
        let t = ledger(dec!(100));
        for _ in 0..10 {
            t.apply_fill(Side::Bid, dec!(0.1));
        }
        assert_eq!(t.base_size(), dec!(1.0));
    }

    #[test]
    fn test_close_mode_when_position_exceeds_threshold() {
        let t = ledger(dec!(10));
        t.apply_fill(Side::Bid, dec!(1));
        // 1 * $50 = $50 >= $10 -> close mode
        assert!(t.is_close_mode(dec!(50)));
        // 1 * $5 = $5 < $10 -> normal mode
        assert!(!t.is_close_mode(dec!(5)));
    }

    #[test]
    fn test_normal_mode_allows_both_sides() {
        let t = ledger(dec!(1000));
        let ctx = t.quoting_context(dec!(100));
        assert!(!ctx.position_state.is_close_mode);
        assert_eq!(ctx.allowed_sides, vec![Side::Bid, Side::Ask]);
    }

    #[test]
    fn test_close_mode_long_only_allows_ask() {
        let t = ledger(dec!(10));
        t.apply_fill(Side::Bid, dec!(1)); // long 1
        let ctx = t.quoting_context(dec!(100)); // $100 >= $10 threshold
        assert!(ctx.position_state.is_close_mode);
        assert!(ctx.position_state.is_long);
        assert_eq!(ctx.allowed_sides, vec![Side::Ask]);
    }

    #[test]
    fn test_close_mode_short_only_allows_bid() {
        let t = ledger(dec!(10));
        t.apply_fill(Side::Ask, dec!(1)); // short -1
        let ctx = t.quoting_context(dec!(100));
        assert!(ctx.position_state.is_close_mode);
        assert!(!ctx.position_state.is_long);
        assert_eq!(ctx.allowed_sides, vec![Side::Bid]);
    }

    #[test]
    fn test_quoting_context_computation() {
        let t = ledger(dec!(100));
        t.apply_fill(Side::Bid, dec!(2));
        t.apply_fill(Side::Ask, dec!(0.5));
        // net position = 1.5
        let ctx = t.quoting_context(dec!(50));
        assert_eq!(ctx.position_state.size_base, dec!(1.5));
        assert_eq!(ctx.position_state.size_usd, dec!(75));
        assert!(ctx.position_state.is_long);
        assert!(!ctx.position_state.is_close_mode); // $75 < $100
        assert_eq!(ctx.fair_price, dec!(50));
    }

    #[tokio::test]
    async fn test_sync_adopts_server_position_on_drift() {
        let (venue, _fills, _book) = PaperVenue::new(1);
        venue.set_position(dec!(0.75));

        let t = ledger(dec!(100));
        t.apply_fill(Side::Bid, dec!(0.5)); // local says 0.5, server says 0.75
        sync_from_server(&venue, 1, &t.base_size).await;
        assert_eq!(t.base_size(), dec!(0.75));
    }

    #[tokio::test]
    async fn test_sync_ignores_sub_threshold_drift() {
        let (venue, _fills, _book) = PaperVenue::new(1);
        venue.set_position(dec!(0.50005));

        let t = ledger(dec!(100));
        t.apply_fill(Side::Bid, dec!(0.5));
        sync_from_server(&venue, 1, &t.base_size).await;
        // |0.5 - 0.50005| = 0.00005 <= 0.0001 -> local retained
        assert_eq!(t.base_size(), dec!(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_task_corrects_drift_each_interval() {
        let (venue, _fills, _book) = PaperVenue::new(1);
        venue.set_position(dec!(0.25));

        let t = PositionLedger::new(PositionConfig {
            close_threshold_usd: dec!(100),
            sync_interval_ms: 5000,
        });
        let cancel = CancellationToken::new();
        t.start_sync(Arc::new(venue.clone()), 1, cancel.clone());

        // The immediate first sync adopts the server value.
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(t.base_size(), dec!(0.25));

        // The server moves; the next interval tick picks it up.
        venue.set_position(dec!(-1.5));
        time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(t.base_size(), dec!(-1.5));

        cancel.cancel();
    }
}
