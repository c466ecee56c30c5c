//! Market maker configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// All tuneable parameters for the market maker.
///
/// Use [`Default::default()`] for sensible defaults, then set `symbol` before
/// passing to the bot.
#[derive(Debug, Clone)]
pub struct MarketMakerConfig {
    /// Market symbol (e.g. "BTC-PERP").
    pub symbol: String,

    // --- Pricing ---
    /// Baseline spread per side in basis points.
    pub base_spread_bps: f64,
    /// Hard cap on the per-side spread in basis points.
    pub max_spread_bps: f64,
    /// How strongly realized volatility widens the spread.
    pub vol_multiplier: f64,
    /// How strongly inventory skews the quoted mid.
    pub skew_factor: f64,
    /// Floor for the effective volatility used in skew/widening, bps.
    pub min_skew_bps: f64,
    /// Penalty scale for the adversely-selected side under momentum, bps.
    pub momentum_penalty_bps: f64,
    /// Extra spread per ladder level, bps.
    pub level_spacing_bps: f64,
    /// Ladder depth per side (1..=3).
    pub levels: usize,
    /// Maker fee per side in bps; spread never drops below twice this.
    pub maker_fee_bps: f64,

    // --- Sizing & risk ---
    /// Notional order size per level-1 quote, USD.
    pub order_size_usd: Decimal,
    /// Position notional cap driving skew and the position risk limit, USD.
    pub max_position_usd: Decimal,
    /// |position ratio| where size tapering begins.
    pub size_reduction_start: f64,
    /// Position USD value that triggers close (reduce-only) mode.
    pub close_threshold_usd: Decimal,
    /// Halt when drawdown from session peak reaches this, USD.
    pub max_drawdown_usd: Decimal,
    /// Halt when daily PnL (incl. unrealized) reaches minus this, USD.
    pub daily_loss_limit_usd: Decimal,

    // --- Market parameters ---
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Minimum size increment.
    pub lot_size: Decimal,

    // --- Fair price / signals ---
    /// Offset samples required before quoting.
    pub warmup_seconds: usize,
    /// Time window for fair price offset samples, ms.
    pub fair_price_window_ms: u64,
    /// Volatility window, seconds.
    pub vol_window_seconds: u64,
    /// Minimum returns before a volatility is produced.
    pub vol_min_samples: usize,
    /// Momentum EMA period, seconds.
    pub momentum_period_seconds: u64,
    /// |EMA| above this is strong momentum, bps.
    pub momentum_strong_bps: f64,

    // --- Timing ---
    /// Minimum interval between quote updates, ms (leading+trailing throttle).
    pub update_throttle_ms: u64,
    /// Interval for syncing open orders from the venue, ms.
    pub order_sync_interval_ms: u64,
    /// Interval for status log lines, ms.
    pub status_interval_ms: u64,
    /// Interval for position sync from the venue, ms.
    pub position_sync_interval_ms: u64,
    /// Interval for PnL snapshot records, ms.
    pub snapshot_interval_ms: u64,
    /// Skip the reconcile when the skewed mid moved fewer bps than this.
    pub reprice_threshold_bps: Option<f64>,

    // --- Output ---
    /// Directory for the JSONL trade log.
    pub trade_log_dir: String,
}

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            base_spread_bps: 8.0,
            max_spread_bps: 40.0,
            vol_multiplier: 0.5,
            skew_factor: 0.5,
            min_skew_bps: 2.0,
            momentum_penalty_bps: 4.0,
            level_spacing_bps: 3.0,
            levels: 1,
            maker_fee_bps: 1.0,
            order_size_usd: dec!(3000),
            max_position_usd: dec!(15000),
            size_reduction_start: 0.5,
            close_threshold_usd: dec!(10000),
            max_drawdown_usd: dec!(150),
            daily_loss_limit_usd: dec!(100),
            tick_size: dec!(0.1),
            lot_size: dec!(0.0001),
            warmup_seconds: 10,
            fair_price_window_ms: 5 * 60 * 1000, // 5 minutes
            vol_window_seconds: 120,
            vol_min_samples: 20,
            momentum_period_seconds: 30,
            momentum_strong_bps: 2.0,
            update_throttle_ms: 100,
            order_sync_interval_ms: 3000,
            status_interval_ms: 1000,
            position_sync_interval_ms: 5000,
            snapshot_interval_ms: 60_000,
            reprice_threshold_bps: None,
            trade_log_dir: "trade-logs".into(),
        }
    }
}
