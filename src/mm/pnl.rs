//! PnL and risk ledger.
//!
//! Tracks realized PnL with an average-cost basis (FIFO-equivalent for a
//! single netted perp position), unrealized PnL against the fair price,
//! session peak and drawdown, per-UTC-day PnL, and trade statistics. Breaching
//! a risk limit raises a sticky halt; daily-loss halts clear themselves at the
//! UTC rollover, all others require a manual reset.
//!
//! All money arithmetic is `Decimal`. Time is injected as epoch milliseconds
//! so day rollovers are driven by event time, not wall clock.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::venue::Side;

/// Risk limits enforced by the ledger.
#[derive(Debug, Clone)]
pub struct PnlConfig {
    /// Halt when drawdown from session peak reaches this (USD).
    pub max_drawdown_usd: Decimal,
    /// Halt when |position notional| reaches this (USD).
    pub max_position_usd: Decimal,
    /// Halt when daily PnL (incl. unrealized) reaches minus this (USD).
    pub daily_loss_limit_usd: Decimal,
}

/// Why the ledger is halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    MaxDrawdown,
    MaxPosition,
    DailyLossLimit,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::MaxDrawdown => write!(f, "Max drawdown limit breached"),
            HaltReason::MaxPosition => write!(f, "Max position limit breached"),
            HaltReason::DailyLossLimit => write!(f, "Daily loss limit breached"),
        }
    }
}

/// Result of applying one fill.
#[derive(Debug, Clone, Copy)]
pub struct FillOutcome {
    /// Realized PnL of the closing portion of the fill (zero for opens).
    pub realized: Decimal,
    /// Whether this fill tripped a risk halt.
    pub halted: bool,
}

/// Mark-to-market snapshot of the ledger.
#[derive(Debug, Clone)]
pub struct PnlSnapshot {
    pub position_base: Decimal,
    pub cost_basis: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub peak_pnl: Decimal,
    pub drawdown: Decimal,
    pub daily_pnl: Decimal,
    pub daily_start_date: NaiveDate,
    pub win_count: u64,
    pub loss_count: u64,
    pub trade_count: u64,
    pub volume_usd: Decimal,
    pub halted: bool,
    pub halt_reason: Option<HaltReason>,
}

/// The ledger itself. Owned exclusively by the market-maker loop.
pub struct PnlLedger {
    config: PnlConfig,
    /// Signed base position (positive = long).
    position_base: Decimal,
    /// Always the non-negative magnitude `|position_base| * avg_entry`.
    cost_basis: Decimal,
    realized_pnl: Decimal,
    peak_pnl: Decimal,
    daily_pnl: Decimal,
    daily_start_date: NaiveDate,
    win_count: u64,
    loss_count: u64,
    trade_count: u64,
    volume_usd: Decimal,
    halted: bool,
    halt_reason: Option<HaltReason>,
    seeded: bool,
}

impl PnlLedger {
    pub fn new(config: PnlConfig, now_ms: u64) -> Self {
        Self {
            config,
            position_base: Decimal::ZERO,
            cost_basis: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            peak_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            daily_start_date: utc_date(now_ms),
            win_count: 0,
            loss_count: 0,
            trade_count: 0,
            volume_usd: Decimal::ZERO,
            halted: false,
            halt_reason: None,
            seeded: false,
        }
    }

    /// Seed with a pre-existing venue position at the first known fair price.
    ///
    /// Entry price = current fair, so the initial unrealized PnL is zero.
    pub fn seed(&mut self, position_base: Decimal, entry_price: Decimal) {
        self.position_base = position_base;
        self.cost_basis = position_base.abs() * entry_price;
        self.seeded = true;
        if !position_base.is_zero() {
            info!(
                position = %position_base,
                entry = %entry_price,
                "PNL ledger seeded with existing position"
            );
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halt_reason
    }

    /// Manually clear a halt (operator action).
    pub fn reset_halt(&mut self) {
        if self.halted {
            info!("risk halt manually cleared");
        }
        self.halted = false;
        self.halt_reason = None;
    }

    /// Apply a fill to the ledger.
    ///
    /// A fill on the same side as the current position (or on a flat book)
    /// opens; an opposite-side fill closes up to the position magnitude at the
    /// average entry price, and any remainder opens a new position at the fill
    /// price.
    pub fn apply_fill(&mut self, side: Side, price: Decimal, size: Decimal, now_ms: u64) -> FillOutcome {
        self.roll_day(now_ms);

        let signed = match side {
            Side::Bid => size,
            Side::Ask => -size,
        };

        let opening = self.position_base.is_zero()
            || (self.position_base > Decimal::ZERO) == (signed > Decimal::ZERO);

        let mut realized = Decimal::ZERO;
        if opening {
            self.cost_basis += size * price;
            self.position_base += signed;
        } else {
            let was_long = self.position_base > Decimal::ZERO;
            let avg_entry = self.cost_basis / self.position_base.abs();
            let closing = size.min(self.position_base.abs());

            realized = if was_long {
                closing * (price - avg_entry)
            } else {
                closing * (avg_entry - price)
            };

            // Position moves toward zero by the closing amount.
            if was_long {
                self.position_base -= closing;
            } else {
                self.position_base += closing;
            }
            self.cost_basis = self.position_base.abs() * avg_entry;

            // Any remainder flips into a new position at the fill price.
            let remainder = size - closing;
            if remainder > Decimal::ZERO {
                self.position_base = if signed > Decimal::ZERO {
                    remainder
                } else {
                    -remainder
                };
                self.cost_basis = remainder * price;
            }

            if realized > Decimal::ZERO {
                self.win_count += 1;
            } else if realized < Decimal::ZERO {
                self.loss_count += 1;
            }
        }

        self.realized_pnl += realized;
        self.daily_pnl += realized;
        self.trade_count += 1;
        self.volume_usd += size * price;

        let halted_now = self.evaluate_risk(price);
        FillOutcome {
            realized,
            halted: halted_now,
        }
    }

    /// Unrealized PnL at the given mark price.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        if self.position_base.is_zero() {
            return Decimal::ZERO;
        }
        let avg_entry = self.cost_basis / self.position_base.abs();
        if self.position_base > Decimal::ZERO {
            self.position_base * (mark - avg_entry)
        } else {
            self.position_base.abs() * (avg_entry - mark)
        }
    }

    /// Mark-to-market snapshot. Updates the session peak and re-evaluates
    /// risk limits (a pure mark-to-market drawdown can halt).
    pub fn get_state(&mut self, mark: Decimal, now_ms: u64) -> PnlSnapshot {
        self.roll_day(now_ms);
        self.evaluate_risk(mark);

        let unrealized = self.unrealized_pnl(mark);
        let total = self.realized_pnl + unrealized;
        let avg_entry = if self.position_base.is_zero() {
            Decimal::ZERO
        } else {
            self.cost_basis / self.position_base.abs()
        };

        PnlSnapshot {
            position_base: self.position_base,
            cost_basis: self.cost_basis,
            avg_entry_price: avg_entry,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: unrealized,
            total_pnl: total,
            peak_pnl: self.peak_pnl,
            drawdown: (self.peak_pnl - total).max(Decimal::ZERO),
            daily_pnl: self.daily_pnl,
            daily_start_date: self.daily_start_date,
            win_count: self.win_count,
            loss_count: self.loss_count,
            trade_count: self.trade_count,
            volume_usd: self.volume_usd,
            halted: self.halted,
            halt_reason: self.halt_reason,
        }
    }

    /// Zero the daily fields when the UTC date rolls over; daily-loss halts
    /// clear with the day, all other halt kinds stay.
    fn roll_day(&mut self, now_ms: u64) {
        let today = utc_date(now_ms);
        if today > self.daily_start_date {
            info!(
                from = %self.daily_start_date,
                to = %today,
                daily_pnl = %self.daily_pnl,
                "UTC day rollover — resetting daily PnL"
            );
            self.daily_pnl = Decimal::ZERO;
            self.daily_start_date = today;
            if self.halt_reason == Some(HaltReason::DailyLossLimit) {
                self.halted = false;
                self.halt_reason = None;
                info!("daily loss halt cleared at UTC rollover");
            }
        }
    }

    /// Check risk limits at the given mark; raises a halt on breach.
    /// Returns whether the ledger is halted after the check.
    fn evaluate_risk(&mut self, mark: Decimal) -> bool {
        if self.halted {
            return true;
        }

        let unrealized = self.unrealized_pnl(mark);
        let total = self.realized_pnl + unrealized;
        if total > self.peak_pnl {
            self.peak_pnl = total;
        }
        let drawdown = (self.peak_pnl - total).max(Decimal::ZERO);

        if drawdown >= self.config.max_drawdown_usd {
            self.halt(HaltReason::MaxDrawdown, drawdown);
        } else if (self.position_base * mark).abs() >= self.config.max_position_usd {
            self.halt(HaltReason::MaxPosition, (self.position_base * mark).abs());
        } else if self.daily_pnl + unrealized <= -self.config.daily_loss_limit_usd {
            self.halt(HaltReason::DailyLossLimit, self.daily_pnl + unrealized);
        }
        self.halted
    }

    fn halt(&mut self, reason: HaltReason, measure: Decimal) {
        self.halted = true;
        self.halt_reason = Some(reason);
        warn!(reason = %reason, measure = %measure, "RISK HALT");
    }
}

/// UTC calendar date of an epoch-milliseconds timestamp.
fn utc_date(now_ms: u64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(now_ms as i64)
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
        .date_naive()
}
