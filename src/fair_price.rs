//! Offset-median fair price estimator.
//!
//! Computes `fair_price = reference_mid + median(venue_mid - reference_mid)`
//! over a sliding time window of slotted offset samples. The venue book is
//! thin and noisy; the reference exchange leads price but carries a
//! structural basis. The median of the basis series is robust to outliers
//! and cheap to maintain. A pre-allocated circular buffer avoids allocations
//! after warmup.

use rust_decimal::Decimal;

/// Slot granularity for offset samples, in milliseconds.
const SLOT_MS: u64 = 200;

/// Maximum samples retained in the circular buffer (~8.3 min at 200 ms).
const MAX_SAMPLES: usize = 2500;

/// Configuration for the fair price estimator.
#[derive(Debug, Clone)]
pub struct FairPriceConfig {
    /// Time window for valid samples in milliseconds (e.g. 300_000 for 5 min).
    pub window_ms: u64,
    /// Minimum samples required before producing a fair price.
    pub min_samples: usize,
}

/// Snapshot of the estimator's current state (for warmup / status display).
#[derive(Debug, Clone)]
pub struct FairPriceState {
    /// Raw median offset (ignores `min_samples`), or `None` if no samples.
    pub offset: Option<Decimal>,
    /// Number of valid (non-expired) samples.
    pub samples: usize,
}

/// A single offset sample: `venue_mid - reference_mid` at a given slot.
#[derive(Clone, Copy)]
struct OffsetSample {
    offset: Decimal,
    slot: u64,
}

/// Fair price estimator over a circular buffer of slotted offset samples.
///
/// # Algorithm
///
/// The caller feeds the venue mid-price and the reference mid-price whenever
/// a fresh pair is available. The estimator stores `offset = venue - reference`
/// keyed by 200 ms slot (at most one sample per slot, first one wins).
///
/// To produce a fair price the estimator:
/// 1. Collects all samples within `window_ms` of the current time.
/// 2. Computes the median of those offsets using `select_nth_unstable` (O(n)).
/// 3. Returns `reference_mid + median_offset`.
pub struct FairPriceEstimator {
    config: FairPriceConfig,
    /// Pre-allocated ring buffer.
    samples: Vec<OffsetSample>,
    /// Next write position (wraps around at `MAX_SAMPLES`).
    head: usize,
    /// Number of samples written so far (capped at `MAX_SAMPLES`).
    count: usize,
    /// Last recorded slot (for dedup).
    last_slot: u64,
}

impl FairPriceEstimator {
    /// Create a new estimator with the given configuration.
    pub fn new(config: FairPriceConfig) -> Self {
        Self {
            config,
            samples: Vec::with_capacity(MAX_SAMPLES),
            head: 0,
            count: 0,
            last_slot: 0,
        }
    }

    /// Record a paired price sample. Only one sample per slot is retained.
    ///
    /// # Arguments
    ///
    /// * `venue_mid` - Mid-price from the target venue's book.
    /// * `reference_mid` - Mid-price from the reference exchange.
    /// * `now_ms` - Current wall-clock time in epoch milliseconds.
    pub fn add_sample(&mut self, venue_mid: Decimal, reference_mid: Decimal, now_ms: u64) {
        let slot = now_ms / SLOT_MS;

        // Deduplicate: at most one sample per slot.
        if slot <= self.last_slot {
            return;
        }
        self.last_slot = slot;

        let sample = OffsetSample {
            offset: venue_mid - reference_mid,
            slot,
        };

        // Write into the circular buffer.
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push(sample);
        } else {
            self.samples[self.head] = sample;
        }
        self.head = (self.head + 1) % MAX_SAMPLES;
        if self.count < MAX_SAMPLES {
            self.count += 1;
        }
    }

    /// Get the fair price: `reference_mid + median(offsets)`.
    ///
    /// Returns `None` if fewer than `min_samples` valid samples exist.
    pub fn fair_price(&self, reference_mid: Decimal, now_ms: u64) -> Option<Decimal> {
        let offset = self.median_offset(now_ms)?;
        Some(reference_mid + offset)
    }

    /// Get the median offset, respecting the `min_samples` threshold.
    pub fn median_offset(&self, now_ms: u64) -> Option<Decimal> {
        let mut offsets = self.collect_valid_offsets(now_ms);
        if offsets.len() < self.config.min_samples {
            return None;
        }
        Some(compute_median(&mut offsets))
    }

    /// Raw median offset (ignores `min_samples`; useful during warmup display).
    pub fn raw_median_offset(&self, now_ms: u64) -> Option<Decimal> {
        let mut offsets = self.collect_valid_offsets(now_ms);
        if offsets.is_empty() {
            return None;
        }
        Some(compute_median(&mut offsets))
    }

    /// Number of valid (non-expired) samples.
    pub fn sample_count(&self, now_ms: u64) -> usize {
        let cutoff = cutoff_slot(now_ms, self.config.window_ms);
        self.samples[..self.count]
            .iter()
            .filter(|s| s.slot > cutoff)
            .count()
    }

    /// Snapshot of the current state for warmup / status display.
    pub fn state(&self, now_ms: u64) -> FairPriceState {
        FairPriceState {
            offset: self.raw_median_offset(now_ms),
            samples: self.sample_count(now_ms),
        }
    }

    /// Collect offsets from samples within the time window.
    fn collect_valid_offsets(&self, now_ms: u64) -> Vec<Decimal> {
        let cutoff = cutoff_slot(now_ms, self.config.window_ms);
        self.samples[..self.count]
            .iter()
            .filter(|s| s.slot > cutoff)
            .map(|s| s.offset)
            .collect()
    }
}

/// The cutoff slot: samples at or before this slot are expired.
fn cutoff_slot(now_ms: u64, window_ms: u64) -> u64 {
    now_ms.saturating_sub(window_ms) / SLOT_MS
}

/// O(n) median via `select_nth_unstable` (introselect).
///
/// For even-length slices, returns the average of the two middle elements.
/// The input slice is partially reordered (acceptable since we own it).
fn compute_median(values: &mut [Decimal]) -> Decimal {
    let n = values.len();
    debug_assert!(n > 0);

    let mid = n / 2;
    // Partitions so that values[mid] is the (mid+1)-th smallest element,
    // with everything before it <= and everything after >=.
    values.select_nth_unstable(mid);

    if n % 2 == 1 {
        values[mid]
    } else {
        // For even n we also need the (mid-1)-th element, which is the max of
        // the left partition (indices 0..mid).
        let left_max = values[..mid]
            .iter()
            .copied()
            .max()
            .unwrap_or(values[mid]);
        (left_max + values[mid]) / Decimal::TWO
    }
}
