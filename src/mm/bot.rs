//! Market maker orchestrator.
//!
//! Single-owner event loop: every ledger, tracker and the order cache are
//! owned here and mutated only from this task. Price feeds, fill events and
//! periodic intervals are the only inputs; the venue is reached through the
//! [`VenueClient`] capability. Quote ticks are throttled with a
//! leading+trailing edge and at most one reconcile is in flight at a time.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::MmError;
use crate::fair_price::{FairPriceConfig, FairPriceEstimator};
use crate::feed::epoch_ms;
use crate::mm::config::MarketMakerConfig;
use crate::mm::pnl::{PnlConfig, PnlLedger};
use crate::mm::position::{PositionConfig, PositionLedger, QuotingContext};
use crate::mm::quoter::{QuoteMode, Quoter, QuoterConfig};
use crate::mm::throttle::UpdateThrottle;
use crate::mm::volatility::{
    MomentumConfig, MomentumTracker, VolatilityConfig, VolatilityTracker,
};
use crate::orders::{cancel_orders, reconcile, CachedOrder};
use crate::trade_log::{rfc3339, FillRecord, SnapshotRecord, TradeLogger};
use crate::types::Quote;
use crate::venue::{
    fetch_info_with_retry, FillEvent, MidPrice, Side, VenueClient, VenueErrorKind,
};

/// Consecutive margin rejections before the operator warning.
const MARGIN_WARN_THRESHOLD: u32 = 5;

/// Maximum feed timestamp skew for a fair-price sample pair, ms.
const PAIRING_WINDOW_MS: u64 = 1000;

/// Top-level market maker.
pub struct MarketMaker {
    config: MarketMakerConfig,
}

impl MarketMaker {
    /// Create a new market maker (does not connect yet).
    pub fn new(config: MarketMakerConfig) -> Self {
        Self { config }
    }

    /// Run the market maker until `cancel` is triggered.
    ///
    /// Inputs are the venue RPC client plus the three streams an exchange
    /// adapter provides: the reference price feed, the venue book, and the
    /// account fill stream.
    pub async fn run(
        &self,
        venue: Arc<dyn VenueClient>,
        market_id: u32,
        mut reference_rx: watch::Receiver<Option<MidPrice>>,
        mut venue_book_rx: watch::Receiver<Option<MidPrice>>,
        mut fill_rx: mpsc::UnboundedReceiver<FillEvent>,
        cancel: CancellationToken,
    ) -> Result<(), MmError> {
        let config = &self.config;
        info!(
            market = %config.symbol,
            spread_bps = config.base_spread_bps,
            levels = config.levels,
            order_size_usd = %config.order_size_usd,
            max_position_usd = %config.max_position_usd,
            close_threshold_usd = %config.close_threshold_usd,
            max_drawdown_usd = %config.max_drawdown_usd,
            daily_loss_limit_usd = %config.daily_loss_limit_usd,
            "CONFIG"
        );

        let mut engine = Engine::new(
            config.clone(),
            Arc::clone(&venue),
            market_id,
            venue_book_rx.clone(),
        )?;

        // Authoritative state before quoting: orders now, position via the
        // sync task's immediate first fetch.
        engine.sync_orders().await;
        engine
            .position
            .start_sync(Arc::clone(&venue), market_id, cancel.clone());

        let mut throttle = UpdateThrottle::new(config.update_throttle_ms);
        let mut last_logged_samples: isize = -1;

        let mut order_sync_interval =
            time::interval(Duration::from_millis(config.order_sync_interval_ms));
        order_sync_interval.tick().await;
        let mut status_interval = time::interval(Duration::from_millis(config.status_interval_ms));
        status_interval.tick().await;
        let mut snapshot_interval =
            time::interval(Duration::from_millis(config.snapshot_interval_ms));
        snapshot_interval.tick().await;

        info!("warming up price feeds...");

        loop {
            // Trailing edge of the throttle, armed only while a fire is pending.
            let trailing_pending = throttle.trailing_deadline_ms().is_some();
            let trailing_fut = match throttle.trailing_deadline_ms() {
                Some(deadline_ms) => {
                    let delta = deadline_ms.saturating_sub(epoch_ms());
                    time::sleep(Duration::from_millis(delta))
                }
                None => time::sleep(Duration::from_secs(86_400)),
            };

            tokio::select! {
                // Reference price update: sample the basis, maybe quote.
                result = reference_rx.changed() => {
                    if result.is_err() {
                        warn!("reference feed stream ended");
                        break;
                    }
                    let now_ms = epoch_ms();
                    let Some(reference) = *reference_rx.borrow_and_update() else {
                        continue;
                    };
                    engine.sample_fair(&reference, now_ms);

                    let fair = match engine.fair_price(&reference, now_ms) {
                        Some(f) => f,
                        None => {
                            engine.log_warmup(&reference, &mut last_logged_samples, now_ms);
                            continue;
                        }
                    };

                    // Log "ready" on the first valid fair price.
                    if last_logged_samples < self.config.warmup_seconds as isize {
                        last_logged_samples = self.config.warmup_seconds as isize;
                        info!(fair_price = %fair.round_dp(2), "ready");
                    }

                    if throttle.on_event(now_ms) {
                        engine.tick(fair, now_ms).await;
                    }
                }

                // Venue book update: sample the basis and the signal trackers.
                result = venue_book_rx.changed() => {
                    if result.is_err() {
                        warn!("venue book stream ended");
                        break;
                    }
                    let now_ms = epoch_ms();
                    let Some(venue_mid) = *venue_book_rx.borrow_and_update() else {
                        continue;
                    };
                    let reference = *reference_rx.borrow();
                    engine.on_venue_price(&venue_mid, reference.as_ref(), now_ms);
                }

                // Trailing throttle fire: requote at the last known fair.
                _ = trailing_fut, if trailing_pending => {
                    let now_ms = epoch_ms();
                    if throttle.on_deadline(now_ms) {
                        if let Some(fair) = engine.last_fair {
                            engine.tick(fair, now_ms).await;
                        }
                    }
                }

                // Fill event.
                Some(fill) = fill_rx.recv() => {
                    engine.handle_fill(fill, epoch_ms()).await;
                }

                // Periodic order sync from the venue.
                _ = order_sync_interval.tick() => {
                    engine.sync_orders().await;
                }

                // Periodic status log.
                _ = status_interval.tick() => {
                    engine.log_status();
                }

                // Periodic PnL snapshot.
                _ = snapshot_interval.tick() => {
                    engine.log_snapshot(epoch_ms());
                }

                // Shutdown.
                _ = cancel.cancelled() => {
                    info!("shutting down");
                    break;
                }
            }
        }

        // Final cleanup: cancel every order we believe is resting.
        if !engine.active_orders.is_empty() {
            match cancel_orders(venue.as_ref(), &engine.active_orders).await {
                Ok(()) => info!(count = engine.active_orders.len(), "cancelled orders — goodbye"),
                Err(e) => error!(error = %e, "shutdown cancel error"),
            }
        } else {
            info!("no active orders — goodbye");
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine: the loop-owned state and per-event procedures
// ---------------------------------------------------------------------------

struct Engine {
    config: MarketMakerConfig,
    venue: Arc<dyn VenueClient>,
    market_id: u32,
    fair_estimator: FairPriceEstimator,
    volatility: VolatilityTracker,
    momentum: MomentumTracker,
    position: PositionLedger,
    pnl: PnlLedger,
    quoter: Quoter,
    trade_log: TradeLogger,
    book_rx: watch::Receiver<Option<MidPrice>>,
    active_orders: Vec<CachedOrder>,
    last_fair: Option<Decimal>,
    /// Skewed mid of the last successfully reconciled quote set.
    last_reconciled_mid: Option<Decimal>,
    /// Spread/mode of the last quote set, for fill records.
    last_spread_bps: f64,
    margin_rejections: u32,
    /// Side quoted next by the flat-book degenerate strategy.
    alternate_side: Side,
    close_mode_active: bool,
    is_updating: bool,
}

impl Engine {
    fn new(
        config: MarketMakerConfig,
        venue: Arc<dyn VenueClient>,
        market_id: u32,
        book_rx: watch::Receiver<Option<MidPrice>>,
    ) -> Result<Self, MmError> {
        let fair_estimator = FairPriceEstimator::new(FairPriceConfig {
            window_ms: config.fair_price_window_ms,
            min_samples: config.warmup_seconds,
        });
        let volatility = VolatilityTracker::new(VolatilityConfig {
            window_seconds: config.vol_window_seconds,
            min_samples: config.vol_min_samples,
        });
        let momentum = MomentumTracker::new(MomentumConfig {
            period_seconds: config.momentum_period_seconds,
            strong_threshold_bps: config.momentum_strong_bps,
        });
        let position = PositionLedger::new(PositionConfig {
            close_threshold_usd: config.close_threshold_usd,
            sync_interval_ms: config.position_sync_interval_ms,
        });
        let pnl = PnlLedger::new(
            PnlConfig {
                max_drawdown_usd: config.max_drawdown_usd,
                max_position_usd: config.max_position_usd,
                daily_loss_limit_usd: config.daily_loss_limit_usd,
            },
            epoch_ms(),
        );
        let quoter = Quoter::new(QuoterConfig {
            base_spread_bps: config.base_spread_bps,
            max_spread_bps: config.max_spread_bps,
            vol_multiplier: config.vol_multiplier,
            skew_factor: config.skew_factor,
            min_skew_bps: config.min_skew_bps,
            momentum_penalty_bps: config.momentum_penalty_bps,
            level_spacing_bps: config.level_spacing_bps,
            levels: config.levels,
            size_reduction_start: config.size_reduction_start,
            maker_fee_bps: config.maker_fee_bps,
            order_size_usd: config.order_size_usd,
            max_position_usd: config.max_position_usd,
            close_threshold_usd: config.close_threshold_usd,
            tick_size: config.tick_size,
            lot_size: config.lot_size,
        });
        let trade_log = TradeLogger::new(config.trade_log_dir.clone())?;

        Ok(Self {
            config,
            venue,
            market_id,
            fair_estimator,
            volatility,
            momentum,
            position,
            pnl,
            quoter,
            trade_log,
            book_rx,
            active_orders: Vec::new(),
            last_fair: None,
            last_reconciled_mid: None,
            last_spread_bps: 0.0,
            margin_rejections: 0,
            alternate_side: Side::Bid,
            close_mode_active: false,
            is_updating: false,
        })
    }

    /// Feed the basis estimator if both feeds have a fresh sample.
    fn sample_fair(&mut self, reference: &MidPrice, now_ms: u64) {
        if let Some(venue_mid) = *self.book_rx.borrow() {
            if timestamps_paired(venue_mid.timestamp_ms, reference.timestamp_ms) {
                self.fair_estimator
                    .add_sample(venue_mid.mid, reference.mid, now_ms);
            }
        }
    }

    /// Venue book moved: sample the basis and the vol/momentum trackers.
    fn on_venue_price(&mut self, venue_mid: &MidPrice, reference: Option<&MidPrice>, now_ms: u64) {
        self.volatility.add_sample(venue_mid.mid, now_ms);
        self.momentum.add_sample(venue_mid.mid, now_ms);
        if let Some(reference) = reference {
            if timestamps_paired(venue_mid.timestamp_ms, reference.timestamp_ms) {
                self.fair_estimator
                    .add_sample(venue_mid.mid, reference.mid, now_ms);
            }
        }
    }

    fn fair_price(&self, reference: &MidPrice, now_ms: u64) -> Option<Decimal> {
        self.fair_estimator.fair_price(reference.mid, now_ms)
    }

    /// One throttled quoting pass.
    async fn tick(&mut self, fair: Decimal, now_ms: u64) {
        // Re-entrancy guard: drop overlapping invocations.
        if self.is_updating {
            debug!("tick dropped — update in flight");
            return;
        }
        self.is_updating = true;
        self.tick_inner(fair, now_ms).await;
        self.is_updating = false;
    }

    async fn tick_inner(&mut self, fair: Decimal, now_ms: u64) {
        self.last_fair = Some(fair);

        // Seed the PnL ledger with the pre-existing venue position at the
        // first known fair price, so initial unrealized PnL is zero.
        if !self.pnl.is_seeded() {
            self.pnl.seed(self.position.base_size(), fair);
        }

        let state = self.pnl.get_state(fair, now_ms);
        if state.halted {
            self.cancel_all("halted").await;
            return;
        }

        let ctx = self.position.quoting_context(fair);
        self.log_position(&ctx);
        self.close_mode_active = ctx.position_state.is_close_mode;

        let bbo = (*self.book_rx.borrow()).map(|m| m.bbo());
        let vol = self.volatility.volatility_bps(now_ms);
        let momentum = self.momentum.momentum_bps();
        let mut quote_set = self.quoter.quotes(&ctx, vol, momentum, bbo.as_ref());

        // Margin fallback: shrink the quote set while margin recovers.
        if self.margin_rejections >= 2 {
            quote_set.quotes =
                degenerate_quotes(&quote_set.quotes, &ctx, &mut self.alternate_side);
        } else if self.margin_rejections >= 1 {
            quote_set.quotes = best_per_side(&quote_set.quotes);
        }

        if quote_set.quotes.is_empty() {
            debug!("no quotes generated");
            return;
        }

        // Skip the reconcile when the skewed mid barely moved since the last
        // successfully reconciled set (stricter skewed-mid interpretation).
        if let (Some(threshold), Some(last)) =
            (self.config.reprice_threshold_bps, self.last_reconciled_mid)
        {
            let drift = drift_bps(last, quote_set.skewed_mid);
            if drift < threshold {
                debug!(drift_bps = drift, "reprice skipped — mid within threshold");
                return;
            }
        }

        self.log_quotes(&quote_set.quotes, fair, quote_set.spread_bps, quote_set.mode);

        match reconcile(
            self.venue.as_ref(),
            self.market_id,
            &self.active_orders,
            &quote_set.quotes,
        )
        .await
        {
            Ok(outcome) => {
                self.active_orders = outcome.orders;
                self.last_reconciled_mid = Some(quote_set.skewed_mid);
                self.last_spread_bps = quote_set.spread_bps;
                if self.margin_rejections > 0 {
                    info!("margin pressure cleared — resuming full quote set");
                }
                self.margin_rejections = 0;
                if outcome.needs_sync || outcome.had_chunk_errors {
                    self.sync_orders().await;
                }
            }
            Err(e) => match e.kind() {
                VenueErrorKind::Margin => {
                    // Cache untouched: the venue rejected the whole group.
                    self.margin_rejections += 1;
                    warn!(
                        error = %e,
                        consecutive = self.margin_rejections,
                        "margin rejection — degrading quote set"
                    );
                    if self.margin_rejections >= MARGIN_WARN_THRESHOLD {
                        warn!(
                            consecutive = self.margin_rejections,
                            "operator attention: persistent margin rejections"
                        );
                    }
                }
                VenueErrorKind::PostOnlyCross => {
                    warn!(error = %e, "post-only cross — repricing next tick");
                }
                VenueErrorKind::StaleOrder => {
                    warn!(error = %e, "stale order in reconcile — forcing sync");
                    self.sync_orders().await;
                }
                VenueErrorKind::Transient | VenueErrorKind::Other => {
                    error!(error = %e, "update error — forcing sync");
                    self.sync_orders().await;
                }
            },
        }
    }

    /// Fill event: ledgers, forced sync, trade record, halt / close-mode exits.
    async fn handle_fill(&mut self, fill: FillEvent, now_ms: u64) {
        if fill.market_id != self.market_id {
            return;
        }
        let dir = if fill.side == Side::Bid { "buy" } else { "sell" };
        info!(side = dir, price = %fill.price, size = %fill.size, "FILL");

        // Optimistic position first; the venue's ack already happened.
        self.position.apply_fill(fill.side, fill.size);

        // A fill consumed an order; its cached ID is now stale.
        self.sync_orders().await;

        let fair = self.last_fair.unwrap_or(fill.price);
        let outcome = self.pnl.apply_fill(fill.side, fill.price, fill.size, now_ms);
        let snap = self.pnl.get_state(fair, now_ms);
        info!(
            realized = %outcome.realized.round_dp(6),
            total = %snap.total_pnl.round_dp(6),
            daily = %snap.daily_pnl.round_dp(6),
            "PNL"
        );

        let close_now = self.position.is_close_mode(fair);
        let record = FillRecord {
            timestamp: rfc3339(now_ms),
            epoch_ms: now_ms,
            symbol: self.config.symbol.clone(),
            side: fill.side.to_string(),
            price: fill.price,
            size: fill.size,
            size_usd: fill.price * fill.size,
            position_after: snap.position_base,
            position_usd_after: snap.position_base * fair,
            realized_pnl: outcome.realized,
            cumulative_realized_pnl: snap.realized_pnl,
            unrealized_pnl: snap.unrealized_pnl,
            fair_price: fair,
            mode: if close_now { "close" } else { "normal" }.to_string(),
            spread_bps: self.last_spread_bps,
        };
        if let Err(e) = self.trade_log.log_fill(&record) {
            error!(error = %e, "failed to write fill record");
        }

        if snap.halted {
            self.cancel_all("risk halt").await;
            self.close_mode_active = close_now;
            return;
        }

        // Entering close mode invalidates the whole ladder; the next tick
        // re-quotes the reducing side only.
        if close_now && !self.close_mode_active {
            self.cancel_all("close mode entered").await;
        }
        self.close_mode_active = close_now;
    }

    /// Cancel all cached orders and clear the cache.
    async fn cancel_all(&mut self, why: &str) {
        if self.active_orders.is_empty() {
            return;
        }
        info!(count = self.active_orders.len(), why, "cancelling all orders");
        if let Err(e) = cancel_orders(self.venue.as_ref(), &self.active_orders).await {
            error!(error = %e, "cancel all failed — forcing sync");
            self.active_orders.clear();
            self.sync_orders().await;
            return;
        }
        self.active_orders.clear();
    }

    /// Replace the order cache with the venue's authoritative set
    /// (bounded-backoff retry; prior cache retained on failure).
    async fn sync_orders(&mut self) {
        let Some(info) = fetch_info_with_retry(self.venue.as_ref(), "orders").await else {
            return;
        };
        self.active_orders = info
            .market_orders(self.market_id)
            .into_iter()
            .map(|o| CachedOrder {
                order_id: o.order_id,
                side: o.side,
                price: o.price,
                size: o.size,
            })
            .collect();
    }

    fn log_position(&self, ctx: &QuotingContext) {
        let pos = &ctx.position_state;
        if pos.size_base.is_zero() {
            return;
        }
        let dir = if pos.is_long { "LONG" } else { "SHORT" };
        let mode = if pos.is_close_mode { " [CLOSE]" } else { "" };
        info!(
            direction = dir,
            size_base = %pos.size_base.abs(),
            size_usd = %pos.size_usd.abs().round_dp(2),
            mode,
            "POS"
        );
    }

    fn log_quotes(&self, quotes: &[Quote], fair: Decimal, spread_bps: f64, mode: QuoteMode) {
        let best_bid = quotes
            .iter()
            .filter(|q| q.side == Side::Bid)
            .map(|q| q.price)
            .max();
        let best_ask = quotes
            .iter()
            .filter(|q| q.side == Side::Ask)
            .map(|q| q.price)
            .min();
        info!(
            bid = best_bid.map(|p| format!("${p}")).unwrap_or_else(|| "--".into()),
            ask = best_ask.map(|p| format!("${p}")).unwrap_or_else(|| "--".into()),
            fair = %fair.round_dp(2),
            spread = format!("{spread_bps:.1}bps"),
            mode = %mode,
            levels = quotes.len(),
            "QUOTE"
        );
    }

    fn log_status(&self) {
        let pos = self.position.base_size();
        let bids: Vec<String> = self
            .active_orders
            .iter()
            .filter(|o| o.side == Side::Bid)
            .map(|o| format!("${}x{}", o.price, o.size))
            .collect();
        let asks: Vec<String> = self
            .active_orders
            .iter()
            .filter(|o| o.side == Side::Ask)
            .map(|o| format!("${}x{}", o.price, o.size))
            .collect();
        let join = |v: Vec<String>| if v.is_empty() { "-".to_string() } else { v.join(",") };
        let now_ms = epoch_ms();
        info!(
            pos = %pos,
            bid = join(bids),
            ask = join(asks),
            vol_bps = self.volatility.volatility_bps(now_ms).map(|v| format!("{v:.1}")),
            vol_returns = self.volatility.return_count(now_ms),
            momentum_bps = self.momentum.ema_bps().map(|m| format!("{m:.1}")),
            momentum_strong = self.momentum.is_strong(),
            margin_rejections = self.margin_rejections,
            halted = self.pnl.is_halted(),
            "STATUS"
        );
    }

    fn log_snapshot(&mut self, now_ms: u64) {
        let Some(fair) = self.last_fair else { return };
        let snap = self.pnl.get_state(fair, now_ms);
        let record = SnapshotRecord {
            timestamp: rfc3339(now_ms),
            epoch_ms: now_ms,
            symbol: self.config.symbol.clone(),
            position_base: snap.position_base,
            position_usd: snap.position_base * fair,
            realized_pnl: snap.realized_pnl,
            unrealized_pnl: snap.unrealized_pnl,
            total_pnl: snap.total_pnl,
            daily_pnl: snap.daily_pnl,
            peak_pnl: snap.peak_pnl,
            drawdown: snap.drawdown,
            win_count: snap.win_count,
            loss_count: snap.loss_count,
            trade_count: snap.trade_count,
            volume_usd: snap.volume_usd,
            halted: snap.halted,
            halt_reason: snap.halt_reason.map(|r| r.to_string()),
        };
        if let Err(e) = self.trade_log.log_snapshot(&record) {
            error!(error = %e, "failed to write snapshot record");
        }
    }

    fn log_warmup(&self, reference: &MidPrice, last_count: &mut isize, now_ms: u64) {
        let state = self.fair_estimator.state(now_ms);
        if state.samples as isize == *last_count {
            return;
        }
        *last_count = state.samples as isize;

        let offset_bps = match (state.offset, reference.mid.to_f64()) {
            (Some(offset), Some(ref_mid)) if ref_mid > 0.0 => {
                let bps = offset.to_f64().unwrap_or(0.0) / ref_mid * 10_000.0;
                format!("{bps:.1}")
            }
            _ => "--".into(),
        };
        let venue_str = (*self.book_rx.borrow())
            .map(|p| format!("${}", p.mid.round_dp(2)))
            .unwrap_or_else(|| "--".into());

        info!(
            samples = format!("{}/{}", state.samples, self.config.warmup_seconds),
            reference = %format!("${}", reference.mid.round_dp(2)),
            venue = venue_str,
            offset_bps,
            "warming up"
        );
    }
}

// ---------------------------------------------------------------------------
// Helpers (pure, testable)
// ---------------------------------------------------------------------------

/// Whether two feed timestamps are close enough to pair a basis sample.
fn timestamps_paired(a_ms: u64, b_ms: u64) -> bool {
    a_ms.abs_diff(b_ms) < PAIRING_WINDOW_MS
}

/// Absolute drift between two mids in basis points.
fn drift_bps(from: Decimal, to: Decimal) -> f64 {
    if from.is_zero() {
        return f64::MAX;
    }
    ((to - from) / from * Decimal::from(10_000u32))
        .abs()
        .to_f64()
        .unwrap_or(f64::MAX)
}

/// Reduce a ladder to the best quote on each side (first margin fallback).
fn best_per_side(quotes: &[Quote]) -> Vec<Quote> {
    let best_bid = quotes
        .iter()
        .filter(|q| q.side == Side::Bid)
        .max_by_key(|q| q.price);
    let best_ask = quotes
        .iter()
        .filter(|q| q.side == Side::Ask)
        .min_by_key(|q| q.price);
    best_bid.into_iter().chain(best_ask).copied().collect()
}

/// Reduce to a single quote (second margin fallback): the reducing side when
/// a position exists, alternating sides when flat.
fn degenerate_quotes(
    quotes: &[Quote],
    ctx: &QuotingContext,
    alternate_side: &mut Side,
) -> Vec<Quote> {
    let side = if ctx.position_state.size_base > Decimal::ZERO {
        Side::Ask
    } else if ctx.position_state.size_base < Decimal::ZERO {
        Side::Bid
    } else {
        let side = *alternate_side;
        *alternate_side = side.flip();
        side
    };

    let best = match side {
        Side::Bid => quotes
            .iter()
            .filter(|q| q.side == Side::Bid)
            .max_by_key(|q| q.price),
        Side::Ask => quotes
            .iter()
            .filter(|q| q.side == Side::Ask)
            .min_by_key(|q| q.price),
    };
    best.into_iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::position::PositionState;
    use crate::venue::paper::PaperVenue;
    use rust_decimal_macros::dec;

    fn quote(side: Side, price: Decimal, size: Decimal) -> Quote {
        Quote { side, price, size }
    }

    fn ladder() -> Vec<Quote> {
        vec![
            quote(Side::Bid, dec!(99), dec!(1)),
            quote(Side::Bid, dec!(98), dec!(1)),
            quote(Side::Ask, dec!(101), dec!(1)),
            quote(Side::Ask, dec!(102), dec!(1)),
        ]
    }

    fn ctx_with_position(size_base: Decimal) -> QuotingContext {
        QuotingContext {
            fair_price: dec!(100),
            position_state: PositionState {
                size_base,
                size_usd: size_base * dec!(100),
                is_long: size_base > Decimal::ZERO,
                is_close_mode: false,
            },
            allowed_sides: vec![Side::Bid, Side::Ask],
        }
    }

    #[test]
    fn test_timestamps_paired_within_window() {
        assert!(timestamps_paired(1_000, 1_999));
        assert!(timestamps_paired(1_999, 1_000));
        assert!(!timestamps_paired(1_000, 2_000));
    }

    #[test]
    fn test_drift_bps() {
        assert!((drift_bps(dec!(100), dec!(100.1)) - 10.0).abs() < 1e-9);
        assert!((drift_bps(dec!(100), dec!(99.9)) - 10.0).abs() < 1e-9);
        assert_eq!(drift_bps(dec!(100), dec!(100)), 0.0);
    }

    #[test]
    fn test_best_per_side_keeps_tightest_quotes() {
        let reduced = best_per_side(&ladder());
        assert_eq!(reduced.len(), 2);
        assert!(reduced.contains(&quote(Side::Bid, dec!(99), dec!(1))));
        assert!(reduced.contains(&quote(Side::Ask, dec!(101), dec!(1))));
    }

    #[test]
    fn test_degenerate_long_quotes_reducing_ask() {
        let mut alt = Side::Bid;
        let q = degenerate_quotes(&ladder(), &ctx_with_position(dec!(1)), &mut alt);
        assert_eq!(q.len(), 1);
        assert_eq!(q[0].side, Side::Ask);
        assert_eq!(q[0].price, dec!(101));
        // Alternation untouched when a position exists.
        assert_eq!(alt, Side::Bid);
    }

    #[test]
    fn test_degenerate_short_quotes_reducing_bid() {
        let mut alt = Side::Bid;
        let q = degenerate_quotes(&ladder(), &ctx_with_position(dec!(-1)), &mut alt);
        assert_eq!(q.len(), 1);
        assert_eq!(q[0].side, Side::Bid);
        assert_eq!(q[0].price, dec!(99));
    }

    #[test]
    fn test_degenerate_flat_alternates_sides() {
        let mut alt = Side::Bid;
        let q1 = degenerate_quotes(&ladder(), &ctx_with_position(Decimal::ZERO), &mut alt);
        assert_eq!(q1[0].side, Side::Bid);
        let q2 = degenerate_quotes(&ladder(), &ctx_with_position(Decimal::ZERO), &mut alt);
        assert_eq!(q2[0].side, Side::Ask);
        let q3 = degenerate_quotes(&ladder(), &ctx_with_position(Decimal::ZERO), &mut alt);
        assert_eq!(q3[0].side, Side::Bid);
    }

    // -- Engine-level scenarios against the paper venue --------------------

    fn test_config() -> MarketMakerConfig {
        MarketMakerConfig {
            symbol: "TEST-PERP".into(),
            order_size_usd: dec!(1000),
            max_position_usd: dec!(100000),
            close_threshold_usd: dec!(50000),
            max_drawdown_usd: dec!(1000000),
            daily_loss_limit_usd: dec!(1000000),
            tick_size: dec!(0.01),
            lot_size: dec!(0.0001),
            warmup_seconds: 1,
            trade_log_dir: std::env::temp_dir()
                .join(format!("perp-mm-bot-test-{}", std::process::id()))
                .to_string_lossy()
                .into_owned(),
            ..MarketMakerConfig::default()
        }
    }

    fn paper() -> (PaperVenue, watch::Receiver<Option<MidPrice>>) {
        let (venue, _fills, book_rx) = PaperVenue::new(1);
        venue.set_book(dec!(99.9), dec!(100.1), 1_000);
        (venue, book_rx)
    }

    fn mk_engine(
        cfg: MarketMakerConfig,
        venue: &PaperVenue,
        book_rx: watch::Receiver<Option<MidPrice>>,
    ) -> Engine {
        Engine::new(cfg, Arc::new(venue.clone()), 1, book_rx).unwrap()
    }

    #[tokio::test]
    async fn test_tick_places_quotes_on_paper_venue() {
        let (venue, book_rx) = paper();
        let mut engine = mk_engine(test_config(), &venue, book_rx);
        engine.tick(dec!(100), 10_000).await;
        assert_eq!(engine.active_orders.len(), 2);
        let info = venue.fetch_info().await.unwrap();
        assert_eq!(info.orders.len(), 2);
        // Seeded on first tick.
        assert!(engine.pnl.is_seeded());
    }

    #[tokio::test]
    async fn test_tick_is_idempotent_for_same_fair() {
        let (venue, book_rx) = paper();
        let mut engine = mk_engine(test_config(), &venue, book_rx);
        engine.tick(dec!(100), 10_000).await;
        let calls = venue.atomic_calls();
        engine.tick(dec!(100), 10_200).await;
        // Identical desired set diffs to nothing.
        assert_eq!(venue.atomic_calls(), calls);
    }

    #[tokio::test]
    async fn test_margin_rejection_degrades_then_recovers() {
        let (venue, book_rx) = paper();
        let mut cfg = test_config();
        cfg.levels = 3;
        let mut engine = mk_engine(cfg, &venue, book_rx);

        venue.fail_next_atomic("OMF too low");
        engine.tick(dec!(100), 10_000).await;
        assert_eq!(engine.margin_rejections, 1);
        assert!(engine.active_orders.is_empty());

        // Next tick quotes only best bid + best ask.
        engine.tick(dec!(100), 10_200).await;
        assert_eq!(engine.margin_rejections, 0);
        assert_eq!(engine.active_orders.len(), 2);
    }

    #[tokio::test]
    async fn test_fill_updates_ledgers_and_syncs_orders() {
        let (venue, book_rx) = paper();
        let mut engine = mk_engine(test_config(), &venue, book_rx);
        engine.tick(dec!(100), 10_000).await;

        // Simulate the venue reporting a bid fill.
        venue.set_position(dec!(0.1));
        let fill = FillEvent {
            market_id: 1,
            side: Side::Bid,
            price: dec!(99.9),
            size: dec!(0.1),
        };
        engine.handle_fill(fill, 11_000).await;

        assert_eq!(engine.position.base_size(), dec!(0.1));
        let snap = engine.pnl.get_state(dec!(100), 12_000);
        assert_eq!(snap.position_base, dec!(0.1));
        assert_eq!(snap.trade_count, 1);
        // Order cache now mirrors the venue (sync was forced).
        let info = venue.fetch_info().await.unwrap();
        assert_eq!(engine.active_orders.len(), info.orders.len());
    }

    #[tokio::test]
    async fn test_halt_cancels_all_and_blocks_quoting() {
        let (venue, book_rx) = paper();
        let mut cfg = test_config();
        cfg.max_drawdown_usd = dec!(5);
        let mut engine = mk_engine(cfg, &venue, book_rx);

        engine.tick(dec!(100), 10_000).await;
        assert!(!engine.active_orders.is_empty());

        // Build a position and mark it far against us: drawdown halt.
        engine.pnl.apply_fill(Side::Bid, dec!(100), dec!(1), 10_500);
        engine.tick(dec!(90), 11_000).await;
        assert!(engine.pnl.is_halted());
        assert!(engine.active_orders.is_empty());
        assert!(venue.fetch_info().await.unwrap().orders.is_empty());

        // Subsequent ticks stay dark.
        let calls = venue.atomic_calls();
        engine.tick(dec!(90), 12_000).await;
        assert_eq!(venue.atomic_calls(), calls);
    }

    #[tokio::test]
    async fn test_reprice_threshold_skips_reconcile() {
        let (venue, book_rx) = paper();
        let mut cfg = test_config();
        cfg.reprice_threshold_bps = Some(5.0);
        let mut engine = mk_engine(cfg, &venue, book_rx);

        engine.tick(dec!(100), 10_000).await;
        let calls = venue.atomic_calls();

        // 1 bp move: below threshold, reconcile skipped entirely.
        engine.tick(dec!(100.01), 10_200).await;
        assert_eq!(venue.atomic_calls(), calls);

        // 20 bp move: repriced.
        engine.tick(dec!(100.2), 10_400).await;
        assert!(venue.atomic_calls() > calls);
    }
}
