mod cli;
mod error;
mod fair_price;
mod feed;
mod mm;
mod orders;
mod trade_log;
mod types;
mod venue;

use std::sync::Arc;

use clap::Parser;
use cli::Command;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::feed::ReferencePriceFeed;
use crate::mm::bot::MarketMaker;
use crate::mm::config::MarketMakerConfig;
use crate::venue::paper::PaperVenue;
use crate::venue::VenueClient;

/// Paper mode quotes a single synthetic market.
const PAPER_MARKET_ID: u32 = 1;

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    let cli = cli::Cli::parse();

    let filter = cli
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cancel = setup_signal_handlers();

    match cli.command {
        Command::Run(args) => {
            let _ = dotenvy::dotenv(); // load .env if present

            let symbol = args.symbol.to_uppercase();
            let reference_symbol = args
                .reference_symbol
                .clone()
                .unwrap_or_else(|| cli::derive_reference_symbol(&symbol));

            let config = MarketMakerConfig {
                symbol,
                base_spread_bps: args.base_spread_bps,
                max_spread_bps: args.max_spread_bps,
                levels: args.levels.clamp(1, 3),
                level_spacing_bps: args.level_spacing_bps,
                order_size_usd: args.order_size_usd,
                max_position_usd: args.max_position_usd,
                close_threshold_usd: args.close_threshold_usd,
                max_drawdown_usd: args.max_drawdown_usd,
                daily_loss_limit_usd: args.daily_loss_limit_usd,
                tick_size: args.tick_size,
                lot_size: args.lot_size,
                warmup_seconds: args.warmup_seconds,
                update_throttle_ms: args.update_throttle_ms,
                order_sync_interval_ms: args.order_sync_interval_ms,
                fair_price_window_ms: args.fair_price_window_ms,
                position_sync_interval_ms: args.position_sync_interval_ms,
                reprice_threshold_bps: args.reprice_threshold_bps,
                trade_log_dir: args.trade_log_dir.clone(),
                ..MarketMakerConfig::default()
            };

            info!(reference = %reference_symbol, "paper mode — no real orders");

            // Reference feed + paper venue mirroring it.
            let reference_feed = ReferencePriceFeed::new(&reference_symbol);
            let (paper, fill_rx, book_rx) = PaperVenue::new(PAPER_MARKET_ID);
            paper.spawn_reference_mirror(
                reference_feed.subscribe_price(),
                args.paper_half_spread_bps.max(dec!(0)),
                cancel.clone(),
            );
            reference_feed.connect();

            let venue: Arc<dyn VenueClient> = Arc::new(paper);
            let bot = MarketMaker::new(config);
            let result = bot
                .run(
                    venue,
                    PAPER_MARKET_ID,
                    reference_feed.subscribe_price(),
                    book_rx,
                    fill_rx,
                    cancel,
                )
                .await;

            reference_feed.close();
            if let Err(e) = result {
                tracing::error!(error = %e, "market maker fatal error");
                std::process::exit(1);
            }
        }
    }
}

/// Register SIGINT and SIGTERM handlers that trigger the returned token.
fn setup_signal_handlers() -> CancellationToken {
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received SIGINT, shutting down");
        cancel_clone.cancel();
    });

    #[cfg(unix)]
    {
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
            sig.recv().await;
            info!("received SIGTERM, shutting down");
            cancel_clone.cancel();
        });
    }

    cancel
}
