//! Rolling volatility and momentum trackers over per-second venue returns.
//!
//! Both trackers sample the venue mid at most once per integer second and
//! work in basis-point returns. Volatility is the Bessel-corrected sample
//! standard deviation over a time window; momentum is an EMA of signed
//! returns. Per the engine's arithmetic rules these are the only places
//! where prices degrade to `f64` (ratio computations).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Maximum return samples retained in the circular buffer (5 min at 1/s).
const MAX_RETURNS: usize = 300;

/// A single mid-price sample at a given second.
#[derive(Clone, Copy)]
struct MidSample {
    second: u64,
    mid: f64,
}

/// Configuration for the volatility tracker.
#[derive(Debug, Clone)]
pub struct VolatilityConfig {
    /// Window over which returns are considered, in seconds.
    pub window_seconds: u64,
    /// Minimum number of returns before a volatility is produced.
    pub min_samples: usize,
}

/// Rolling standard deviation of one-second basis-point returns.
pub struct VolatilityTracker {
    config: VolatilityConfig,
    samples: Vec<MidSample>,
    head: usize,
    count: usize,
    last_second: u64,
}

impl VolatilityTracker {
    pub fn new(config: VolatilityConfig) -> Self {
        Self {
            config,
            samples: Vec::with_capacity(MAX_RETURNS),
            head: 0,
            count: 0,
            last_second: 0,
        }
    }

    /// Record a mid-price sample. Only one sample per second is retained.
    pub fn add_sample(&mut self, mid: Decimal, now_ms: u64) {
        let second = now_ms / 1000;
        if second <= self.last_second {
            return;
        }
        let Some(mid) = mid.to_f64() else { return };
        if mid <= 0.0 {
            return;
        }
        self.last_second = second;

        let sample = MidSample { second, mid };
        if self.samples.len() < MAX_RETURNS {
            self.samples.push(sample);
        } else {
            self.samples[self.head] = sample;
        }
        self.head = (self.head + 1) % MAX_RETURNS;
        if self.count < MAX_RETURNS {
            self.count += 1;
        }
    }

    /// Sample standard deviation of bp returns over the window, or `None`
    /// until at least `min_samples` returns exist.
    pub fn volatility_bps(&self, now_ms: u64) -> Option<f64> {
        let returns = self.collect_returns(now_ms);
        if returns.len() < self.config.min_samples.max(2) {
            return None;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        // Bessel-corrected sample variance.
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt())
    }

    /// Number of returns currently inside the window.
    pub fn return_count(&self, now_ms: u64) -> usize {
        self.collect_returns(now_ms).len()
    }

    /// Consecutive-sample bp returns within the window, in time order.
    fn collect_returns(&self, now_ms: u64) -> Vec<f64> {
        let cutoff = (now_ms / 1000).saturating_sub(self.config.window_seconds);
        let mut mids: Vec<MidSample> = self.samples[..self.count]
            .iter()
            .filter(|s| s.second > cutoff)
            .copied()
            .collect();
        mids.sort_unstable_by_key(|s| s.second);
        mids.windows(2)
            .map(|w| 10_000.0 * (w[1].mid - w[0].mid) / w[0].mid)
            .collect()
    }
}

/// Configuration for the momentum tracker.
#[derive(Debug, Clone)]
pub struct MomentumConfig {
    /// EMA period in seconds; alpha = 2 / (period + 1).
    pub period_seconds: u64,
    /// |EMA| above this is considered strong momentum.
    pub strong_threshold_bps: f64,
}

/// EMA of signed one-second bp returns.
///
/// The first sample only seeds the previous mid; the EMA starts with the
/// first return and is updated from the second return onward.
pub struct MomentumTracker {
    config: MomentumConfig,
    alpha: f64,
    last_second: u64,
    prev_mid: Option<f64>,
    ema: Option<f64>,
}

impl MomentumTracker {
    pub fn new(config: MomentumConfig) -> Self {
        let alpha = 2.0 / (config.period_seconds as f64 + 1.0);
        Self {
            config,
            alpha,
            last_second: 0,
            prev_mid: None,
            ema: None,
        }
    }

    /// Record a mid-price sample. Only one sample per second is retained.
    pub fn add_sample(&mut self, mid: Decimal, now_ms: u64) {
        let second = now_ms / 1000;
        if second <= self.last_second {
            return;
        }
        let Some(mid) = mid.to_f64() else { return };
        if mid <= 0.0 {
            return;
        }
        self.last_second = second;

        let Some(prev) = self.prev_mid else {
            self.prev_mid = Some(mid);
            return;
        };
        let ret = 10_000.0 * (mid - prev) / prev;
        self.ema = Some(match self.ema {
            None => ret,
            Some(ema) => self.alpha * ret + (1.0 - self.alpha) * ema,
        });
        self.prev_mid = Some(mid);
    }

    /// Current EMA of bp returns, or `None` before the first return.
    pub fn ema_bps(&self) -> Option<f64> {
        self.ema
    }

    /// Current EMA, treating "no data yet" as zero momentum.
    pub fn momentum_bps(&self) -> f64 {
        self.ema.unwrap_or(0.0)
    }

    /// Whether momentum magnitude exceeds the strong threshold.
    pub fn is_strong(&self) -> bool {
        self.momentum_bps().abs() > self.config.strong_threshold_bps
    }
}
