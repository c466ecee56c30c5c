use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

/// perp-mm — inventory-aware perp market maker.
#[derive(Parser, Debug)]
#[command(name = "perp-mm", version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the market maker in paper-trading mode against the live
    /// reference feed (live venues plug in through the venue client trait)
    Run(RunArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Market symbol (e.g. BTC-PERP)
    pub symbol: String,

    /// Reference feed symbol (defaults to the base asset + usdt)
    #[arg(long)]
    pub reference_symbol: Option<String>,

    /// Baseline spread per side in basis points
    #[arg(long, default_value = "8")]
    pub base_spread_bps: f64,

    /// Hard cap on the per-side spread in basis points
    #[arg(long, default_value = "40")]
    pub max_spread_bps: f64,

    /// Ladder levels per side (1-3)
    #[arg(long, default_value = "1")]
    pub levels: usize,

    /// Extra spread per ladder level in basis points
    #[arg(long, default_value = "3")]
    pub level_spacing_bps: f64,

    /// Order size in USD per level-1 quote
    #[arg(long, default_value = "3000")]
    pub order_size_usd: Decimal,

    /// Position notional cap in USD
    #[arg(long, default_value = "15000")]
    pub max_position_usd: Decimal,

    /// Position USD threshold that triggers close mode
    #[arg(long, default_value = "10000")]
    pub close_threshold_usd: Decimal,

    /// Halt when drawdown from the session peak reaches this (USD)
    #[arg(long, default_value = "150")]
    pub max_drawdown_usd: Decimal,

    /// Halt when the daily loss reaches this (USD)
    #[arg(long, default_value = "100")]
    pub daily_loss_limit_usd: Decimal,

    /// Minimum price increment
    #[arg(long, default_value = "0.1")]
    pub tick_size: Decimal,

    /// Minimum size increment
    #[arg(long, default_value = "0.0001")]
    pub lot_size: Decimal,

    /// Offset samples required before quoting
    #[arg(long, default_value = "10")]
    pub warmup_seconds: usize,

    /// Minimum interval between quote updates (ms)
    #[arg(long, default_value = "100")]
    pub update_throttle_ms: u64,

    /// Interval for syncing orders from the venue (ms)
    #[arg(long, default_value = "3000")]
    pub order_sync_interval_ms: u64,

    /// Fair price sample window (ms)
    #[arg(long, default_value = "300000")]
    pub fair_price_window_ms: u64,

    /// Interval for position sync from the venue (ms)
    #[arg(long, default_value = "5000")]
    pub position_sync_interval_ms: u64,

    /// Skip repricing when the skewed mid moved fewer bps than this
    #[arg(long)]
    pub reprice_threshold_bps: Option<f64>,

    /// Directory for JSONL trade records
    #[arg(long, default_value = "trade-logs")]
    pub trade_log_dir: String,

    /// Synthetic half-spread of the paper venue book (bps)
    #[arg(long, default_value = "2")]
    pub paper_half_spread_bps: Decimal,
}

/// Derive the reference-feed symbol from an exchange market symbol.
///
/// `"BTC-PERP"` -> `"btcusdt"`, `"ETH-PERP"` -> `"ethusdt"`.
pub fn derive_reference_symbol(market_symbol: &str) -> String {
    let base = market_symbol
        .split('-')
        .next()
        .unwrap_or(market_symbol)
        .to_lowercase()
        .replace("usd", "");
    format!("{base}usdt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_reference_symbol() {
        assert_eq!(derive_reference_symbol("BTC-PERP"), "btcusdt");
        assert_eq!(derive_reference_symbol("ETH-PERP"), "ethusdt");
        assert_eq!(derive_reference_symbol("SOL-PERP"), "solusdt");
        assert_eq!(derive_reference_symbol("DOGE-PERP"), "dogeusdt");
    }
}
