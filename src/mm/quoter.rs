//! Quote ladder generator.
//!
//! Produces a ladder of bid/ask quotes around an inventory-skewed mid:
//! spreads widen with realized volatility, the mid shifts against inventory,
//! strong momentum penalizes the adversely-selected side, and sizes taper as
//! the position approaches its cap. Prices are tick-aligned (floor for bids,
//! ceil for asks) and sizes lot-aligned (floor) in `Decimal`; only bps and
//! ratio math runs in `f64`.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing::debug;

use crate::mm::position::QuotingContext;
use crate::types::Quote;
use crate::venue::{Side, BBO};

/// Ladder size weights, indexed by `levels - 1`.
const LEVEL_WEIGHTS: [&[f64]; 3] = [&[1.0], &[0.65, 0.35], &[0.55, 0.30, 0.15]];

/// |momentum| above this triggers the adverse-selection penalty.
const MOMENTUM_PENALTY_TRIGGER_BPS: f64 = 1.5;

/// Inventory ratio above which the adding side is switched off entirely.
const ADDING_CUTOFF_RATIO: f64 = 0.9;

/// Quoter configuration (all pricing knobs).
#[derive(Debug, Clone)]
pub struct QuoterConfig {
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
    /// Penalty scale applied to the adversely-selected side, bps.
    pub momentum_penalty_bps: f64,
    /// Extra spread per ladder level, bps.
    pub level_spacing_bps: f64,
    /// Ladder depth per side (1..=3).
    pub levels: usize,
    /// |position ratio| where size tapering begins.
    pub size_reduction_start: f64,
    /// Maker fee per side in bps; spread never drops below twice this.
    pub maker_fee_bps: f64,
    /// Notional size per level 1 quote, USD.
    pub order_size_usd: Decimal,
    /// Position notional cap, USD (drives the skew ratio).
    pub max_position_usd: Decimal,
    /// Position notional at which the adding side is hard-capped off, USD.
    pub close_threshold_usd: Decimal,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Minimum size increment.
    pub lot_size: Decimal,
}

/// Quoting mode derived from the position state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteMode {
    Normal,
    Close,
}

impl std::fmt::Display for QuoteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuoteMode::Normal => write!(f, "normal"),
            QuoteMode::Close => write!(f, "close"),
        }
    }
}

/// The quote ladder plus the diagnostics the loop needs (reprice skip,
/// fill records, QUOTE log lines).
#[derive(Debug, Clone)]
pub struct QuoteSet {
    pub quotes: Vec<Quote>,
    /// The inventory-skewed mid both sides are priced from.
    pub skewed_mid: Decimal,
    /// Effective per-side spread before momentum penalty, bps.
    pub spread_bps: f64,
    /// Current skew in bps (signed; positive shifts the mid down).
    pub skew_bps: f64,
    pub mode: QuoteMode,
}

impl QuoteSet {
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

/// Rounding direction for tick alignment.
enum RoundMode {
    Floor,
    Ceil,
}

/// Generates the quote ladder from fair price, position, volatility and
/// momentum.
pub struct Quoter {
    config: QuoterConfig,
}

impl Quoter {
    pub fn new(config: QuoterConfig) -> Self {
        Self { config }
    }

    /// Generate quotes for the given context, clamped to the BBO.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Fair price, position state and allowed sides.
    /// * `volatility_bps` - Realized volatility, or `None` during warmup.
    /// * `momentum_bps` - EMA of signed returns (zero when unknown).
    /// * `bbo` - Venue best bid/ask, if the book is live.
    pub fn quotes(
        &self,
        ctx: &QuotingContext,
        volatility_bps: Option<f64>,
        momentum_bps: f64,
        bbo: Option<&BBO>,
    ) -> QuoteSet {
        let cfg = &self.config;
        let fair = ctx.fair_price;
        let position_usd = ctx.position_state.size_usd;
        let mode = if ctx.position_state.is_close_mode {
            QuoteMode::Close
        } else {
            QuoteMode::Normal
        };

        // --- Derived quantities (bps/ratio math in f64) ---
        let max_position = cfg.max_position_usd.to_f64().unwrap_or(f64::MAX);
        let position_ratio = if max_position > 0.0 {
            (position_usd.to_f64().unwrap_or(0.0) / max_position).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let vol_eff = volatility_bps
            .unwrap_or(cfg.base_spread_bps)
            .max(cfg.min_skew_bps);
        let skew_bps = cfg.skew_factor * position_ratio * vol_eff;
        let skewed_mid = fair * (Decimal::ONE - bps_to_fraction(skew_bps));

        let spread_floor = cfg.base_spread_bps.max(2.0 * cfg.maker_fee_bps);
        let spread_bps = (cfg.base_spread_bps + cfg.vol_multiplier * vol_eff)
            .max(spread_floor)
            .min(cfg.max_spread_bps);

        // Momentum penalty widens only the adversely-selected side.
        let (bid_penalty_bps, ask_penalty_bps) = momentum_penalties(
            momentum_bps,
            cfg.momentum_penalty_bps,
        );

        // --- Size shaping ---
        let base_size = if fair > Decimal::ZERO {
            align_size(cfg.order_size_usd / fair, cfg.lot_size)
        } else {
            Decimal::ZERO
        };
        let (bid_mult, ask_mult) = self.side_multipliers(position_ratio, position_usd);

        debug!(
            fair = %fair,
            skewed_mid = %skewed_mid,
            position_ratio,
            vol_eff,
            skew_bps,
            spread_bps,
            bid_penalty_bps,
            ask_penalty_bps,
            bid_mult,
            ask_mult,
            "ENHANCED quote diagnostics"
        );

        let mut quotes = Vec::with_capacity(cfg.levels * 2);
        let weights = LEVEL_WEIGHTS[cfg.levels.clamp(1, 3) - 1];

        if ctx.allowed_sides.contains(&Side::Bid) {
            self.push_ladder(
                &mut quotes,
                Side::Bid,
                skewed_mid,
                spread_bps + bid_penalty_bps,
                base_size,
                bid_mult,
                weights,
                bbo,
            );
        }
        if ctx.allowed_sides.contains(&Side::Ask) {
            self.push_ladder(
                &mut quotes,
                Side::Ask,
                skewed_mid,
                spread_bps + ask_penalty_bps,
                base_size,
                ask_mult,
                weights,
                bbo,
            );
        }

        QuoteSet {
            quotes,
            skewed_mid,
            spread_bps,
            skew_bps,
            mode,
        }
    }

    /// Size multipliers for (bid, ask) from the signed position ratio.
    ///
    /// The side that grows the position tapers linearly past
    /// `size_reduction_start`, cuts off entirely above [`ADDING_CUTOFF_RATIO`]
    /// or the close threshold; the reducing side is boosted.
    fn side_multipliers(&self, position_ratio: f64, position_usd: Decimal) -> (f64, f64) {
        let cfg = &self.config;
        let r = position_ratio.abs();

        let (mut adding, reducing) = if r <= cfg.size_reduction_start {
            (1.0, 1.0)
        } else {
            let rho = (r - cfg.size_reduction_start) / (1.0 - cfg.size_reduction_start);
            ((1.0 - 0.8 * rho).max(0.0), 1.0 + 0.3 * rho)
        };
        if r > ADDING_CUTOFF_RATIO {
            adding = 0.0;
        }
        if position_usd.abs() >= cfg.close_threshold_usd {
            adding = 0.0;
        }

        if position_ratio > 0.0 {
            // Long: bids add, asks reduce.
            (adding, reducing)
        } else if position_ratio < 0.0 {
            // Short: asks add, bids reduce.
            (reducing, adding)
        } else {
            (1.0, 1.0)
        }
    }

    /// Push one side's ladder, clamping each level to the BBO.
    #[allow(clippy::too_many_arguments)]
    fn push_ladder(
        &self,
        quotes: &mut Vec<Quote>,
        side: Side,
        skewed_mid: Decimal,
        side_spread_bps: f64,
        base_size: Decimal,
        side_mult: f64,
        weights: &[f64],
        bbo: Option<&BBO>,
    ) {
        let cfg = &self.config;
        for (level, weight) in weights.iter().enumerate() {
            let level_bps = side_spread_bps + level as f64 * cfg.level_spacing_bps;
            let offset = bps_to_fraction(level_bps);

            let mut price = match side {
                Side::Bid => align_price(
                    skewed_mid * (Decimal::ONE - offset),
                    cfg.tick_size,
                    RoundMode::Floor,
                ),
                Side::Ask => align_price(
                    skewed_mid * (Decimal::ONE + offset),
                    cfg.tick_size,
                    RoundMode::Ceil,
                ),
            };

            // Clamp to the BBO: never cross the spread.
            if let Some(bbo) = bbo {
                match side {
                    Side::Bid if price >= bbo.best_ask => {
                        price = align_price(
                            bbo.best_ask - cfg.tick_size,
                            cfg.tick_size,
                            RoundMode::Floor,
                        );
                    }
                    Side::Ask if price <= bbo.best_bid => {
                        price = align_price(
                            bbo.best_bid + cfg.tick_size,
                            cfg.tick_size,
                            RoundMode::Ceil,
                        );
                    }
                    _ => {}
                }
            }

            let size = align_size(
                base_size * Decimal::from_f64(side_mult * weight).unwrap_or_default(),
                cfg.lot_size,
            );

            if price > Decimal::ZERO && size > Decimal::ZERO {
                quotes.push(Quote { side, price, size });
            }
        }
    }
}

/// Momentum penalty per side: `(bid_bps, ask_bps)`.
///
/// Rising momentum penalizes the bid side, falling momentum the ask side;
/// below the trigger no penalty applies.
fn momentum_penalties(momentum_bps: f64, penalty_scale_bps: f64) -> (f64, f64) {
    if momentum_bps.abs() <= MOMENTUM_PENALTY_TRIGGER_BPS {
        return (0.0, 0.0);
    }
    let penalty = penalty_scale_bps * momentum_bps.abs() / 5.0;
    if momentum_bps > 0.0 {
        (penalty, 0.0)
    } else {
        (0.0, penalty)
    }
}

/// Convert basis points to a `Decimal` fraction.
fn bps_to_fraction(bps: f64) -> Decimal {
    Decimal::from_f64(bps).unwrap_or_default() / dec_ten_thousand()
}

fn dec_ten_thousand() -> Decimal {
    Decimal::from(10_000u32)
}

/// Align a price to the tick size.
fn align_price(price: Decimal, tick_size: Decimal, mode: RoundMode) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return price;
    }
    let ticks = price / tick_size;
    let aligned = match mode {
        RoundMode::Floor => ticks.floor(),
        RoundMode::Ceil => ticks.ceil(),
    };
    aligned * tick_size
}

/// Align a size to the lot size (always rounds down).
fn align_size(size: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return size;
    }
    (size / lot_size).floor() * lot_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::position::PositionState;
    use rust_decimal_macros::dec;

    fn config() -> QuoterConfig {
        QuoterConfig {
            base_spread_bps: 10.0,
            max_spread_bps: 50.0,
            vol_multiplier: 0.5,
            skew_factor: 0.5,
            min_skew_bps: 5.0,
            momentum_penalty_bps: 10.0,
            level_spacing_bps: 4.0,
            levels: 1,
            size_reduction_start: 0.5,
            maker_fee_bps: 2.0,
            order_size_usd: dec!(1000),
            max_position_usd: dec!(10000),
            close_threshold_usd: dec!(8000),
            tick_size: dec!(0.01),
            lot_size: dec!(0.0001),
        }
    }

    fn quoter() -> Quoter {
        Quoter::new(config())
    }

    fn ctx(fair: Decimal, position_usd: Decimal) -> QuotingContext {
        let size_base = if fair.is_zero() {
            Decimal::ZERO
        } else {
            position_usd / fair
        };
        QuotingContext {
            fair_price: fair,
            position_state: PositionState {
                size_base,
                size_usd: position_usd,
                is_long: size_base > Decimal::ZERO,
                is_close_mode: false,
            },
            allowed_sides: vec![Side::Bid, Side::Ask],
        }
    }

    fn bids(qs: &QuoteSet) -> Vec<&Quote> {
        qs.quotes.iter().filter(|q| q.side == Side::Bid).collect()
    }

    fn asks(qs: &QuoteSet) -> Vec<&Quote> {
        qs.quotes.iter().filter(|q| q.side == Side::Ask).collect()
    }

    #[test]
    fn test_flat_position_quotes_symmetric_around_fair() {
        let q = quoter();
        let qs = q.quotes(&ctx(dec!(50000), Decimal::ZERO), None, 0.0, None);
        assert_eq!(qs.quotes.len(), 2);
        // No skew when flat.
        assert_eq!(qs.skewed_mid, dec!(50000));
        let bid = bids(&qs)[0];
        let ask = asks(&qs)[0];
        assert!(bid.price < dec!(50000));
        assert!(ask.price > dec!(50000));
    }

    #[test]
    fn test_skew_sign_follows_inventory() {
        // Long -> skewed mid below fair; short -> above (inventory skew law).
        let q = quoter();
        let long = q.quotes(&ctx(dec!(50000), dec!(5000)), None, 0.0, None);
        assert!(long.skewed_mid < dec!(50000));
        let short = q.quotes(&ctx(dec!(50000), dec!(-5000)), None, 0.0, None);
        assert!(short.skewed_mid > dec!(50000));
        let flat = q.quotes(&ctx(dec!(50000), Decimal::ZERO), None, 0.0, None);
        assert_eq!(flat.skewed_mid, dec!(50000));
    }

    #[test]
    fn test_vol_widens_spread_up_to_cap() {
        let q = quoter();
        let calm = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(10.0), 0.0, None);
        let wild = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(60.0), 0.0, None);
        // base 10 + 0.5*10 = 15; base 10 + 0.5*60 = 40.
        assert!((calm.spread_bps - 15.0).abs() < 1e-9);
        assert!((wild.spread_bps - 40.0).abs() < 1e-9);
        // Beyond the cap.
        let capped = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(200.0), 0.0, None);
        assert!((capped.spread_bps - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_spread_floor_is_twice_maker_fee() {
        let mut cfg = config();
        cfg.base_spread_bps = 1.0;
        cfg.vol_multiplier = 0.0;
        cfg.min_skew_bps = 0.0;
        cfg.maker_fee_bps = 3.0;
        let q = Quoter::new(cfg);
        let qs = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(0.0), 0.0, None);
        assert!((qs.spread_bps - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_momentum_penalty_applies_to_one_side() {
        let q = quoter();
        let neutral = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(10.0), 0.0, None);
        let rising = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(10.0), 5.0, None);
        // Rising momentum widens the bid side only.
        assert!(bids(&rising)[0].price < bids(&neutral)[0].price);
        assert_eq!(asks(&rising)[0].price, asks(&neutral)[0].price);

        let falling = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(10.0), -5.0, None);
        assert!(asks(&falling)[0].price > asks(&neutral)[0].price);
        assert_eq!(bids(&falling)[0].price, bids(&neutral)[0].price);
    }

    #[test]
    fn test_weak_momentum_no_penalty() {
        let q = quoter();
        let neutral = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(10.0), 0.0, None);
        let weak = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(10.0), 1.4, None);
        assert_eq!(bids(&weak)[0].price, bids(&neutral)[0].price);
        assert_eq!(asks(&weak)[0].price, asks(&neutral)[0].price);
    }

    #[test]
    fn test_size_tapering_and_boost() {
        let q = quoter();
        // r = 0.75, start = 0.5 -> rho = 0.5; adding (bid) = 0.6, reducing = 1.15.
        let qs = q.quotes(&ctx(dec!(100), dec!(7500)), None, 0.0, None);
        let base = dec!(10); // 1000 / 100
        assert_eq!(bids(&qs)[0].size, base * dec!(0.6));
        assert_eq!(asks(&qs)[0].size, align_size(base * dec!(1.15), dec!(0.0001)));
    }

    #[test]
    fn test_adding_side_cut_off_beyond_ratio_cutoff() {
        let mut cfg = config();
        cfg.close_threshold_usd = dec!(100000); // keep the hard cap out of play
        let q = Quoter::new(cfg);
        // r = 0.95 > 0.9 -> no bids at all.
        let qs = q.quotes(&ctx(dec!(100), dec!(9500)), None, 0.0, None);
        assert!(bids(&qs).is_empty());
        assert!(!asks(&qs).is_empty());
    }

    #[test]
    fn test_close_threshold_hard_caps_adding_side() {
        let q = quoter();
        // $8000 notional >= close_threshold -> bid side zeroed even though
        // r = 0.8 alone would only taper it.
        let qs = q.quotes(&ctx(dec!(100), dec!(8000)), None, 0.0, None);
        assert!(bids(&qs).is_empty());
    }

    #[test]
    fn test_at_position_cap_only_reducing_side() {
        // At +max_position the bid multiplier is zero and the mid is skewed
        // down: only asks survive.
        let q = quoter();
        let qs = q.quotes(&ctx(dec!(100), dec!(10000)), Some(10.0), 0.0, None);
        assert!(bids(&qs).is_empty());
        assert_eq!(asks(&qs).len(), 1);
        assert!(qs.skewed_mid < dec!(100));
    }

    #[test]
    fn test_three_level_ladder_shape() {
        let mut cfg = config();
        cfg.levels = 3;
        let q = Quoter::new(cfg);
        let qs = q.quotes(&ctx(dec!(50000), Decimal::ZERO), Some(10.0), 0.0, None);
        let b = bids(&qs);
        let a = asks(&qs);
        assert_eq!(b.len(), 3);
        assert_eq!(a.len(), 3);
        // Deeper bids are cheaper, deeper asks dearer.
        assert!(b[0].price > b[1].price && b[1].price > b[2].price);
        assert!(a[0].price < a[1].price && a[1].price < a[2].price);
        // Level weights 0.55/0.30/0.15 of base size 0.02.
        assert_eq!(b[0].size, dec!(0.0110));
        assert_eq!(b[1].size, dec!(0.0060));
        assert_eq!(b[2].size, dec!(0.0030));
    }

    #[test]
    fn test_bbo_clamp_keeps_book_uncrossed() {
        let q = quoter();
        let bbo = BBO {
            best_bid: dec!(50004),
            best_ask: dec!(50006),
        };
        // Fair well above the venue book: raw asks would sit below best bid.
        let qs = q.quotes(&ctx(dec!(49000), Decimal::ZERO), None, 0.0, Some(&bbo));
        for quote in &qs.quotes {
            match quote.side {
                Side::Bid => assert!(quote.price < bbo.best_ask),
                Side::Ask => assert!(quote.price > bbo.best_bid),
            }
        }
        // And a fair far below: raw bids would cross the best ask.
        let qs = q.quotes(&ctx(dec!(51000), Decimal::ZERO), None, 0.0, Some(&bbo));
        for quote in &qs.quotes {
            match quote.side {
                Side::Bid => assert!(quote.price < bbo.best_ask),
                Side::Ask => assert!(quote.price > bbo.best_bid),
            }
        }
    }

    #[test]
    fn test_tick_and_lot_alignment() {
        let q = quoter();
        let qs = q.quotes(&ctx(dec!(49999.37), dec!(1234)), Some(17.3), 2.2, None);
        for quote in &qs.quotes {
            let ticks = quote.price / dec!(0.01);
            assert_eq!(ticks, ticks.floor(), "price {} not tick aligned", quote.price);
            let lots = quote.size / dec!(0.0001);
            assert_eq!(lots, lots.floor(), "size {} not lot aligned", quote.size);
        }
    }

    #[test]
    fn test_allowed_sides_respected() {
        let q = quoter();
        let mut c = ctx(dec!(50000), dec!(9000));
        c.position_state.is_close_mode = true;
        c.allowed_sides = vec![Side::Ask];
        let qs = q.quotes(&c, None, 0.0, None);
        assert!(bids(&qs).is_empty());
        assert!(!asks(&qs).is_empty());
        assert_eq!(qs.mode, QuoteMode::Close);
    }

    #[test]
    fn test_zero_fair_produces_no_quotes() {
        let q = quoter();
        let qs = q.quotes(&ctx(Decimal::ZERO, Decimal::ZERO), None, 0.0, None);
        assert!(qs.is_empty());
    }

    #[test]
    fn test_tiny_order_size_rounds_to_empty() {
        let mut cfg = config();
        cfg.order_size_usd = dec!(0.001); // far below one lot at fair 100
        let q = Quoter::new(cfg);
        let qs = q.quotes(&ctx(dec!(100), Decimal::ZERO), None, 0.0, None);
        assert!(qs.is_empty());
    }
}
