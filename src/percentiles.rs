//! Latency accumulators used for live and full-run percentiles.
//!
//! Two structures live here:
//! - [`LatencyAccumulator`]: an exact, unordered bag of microsecond samples
//!   answering nearest-rank percentile queries. The reporter drains one of
//!   these every second.
//! - [`CumulativeLatency`]: an HDR histogram that is never reset and feeds the
//!   final summary, so memory stays bounded over long runs.
//!
//! Both are safe to share between many recording workers and one reader.

use hdrhistogram::Histogram;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Highest latency the cumulative histogram can hold (60 seconds in µs).
const MAX_TRACKABLE_US: u64 = 60_000_000;

/// p50/p95/p99 in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PercentileSnapshot {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl PercentileSnapshot {
    /// Format as `p50=..ms, p95=..ms, p99=..ms`.
    pub fn format(&self) -> String {
        format!(
            "p50={:.2}ms, p95={:.2}ms, p99={:.2}ms",
            self.p50_ms, self.p95_ms, self.p99_ms
        )
    }
}

/// Nearest-rank index for `p` over `n` sorted samples, clamped to `[0, n-1]`.
///
/// `n` must be non-zero.
pub fn nearest_rank_index(p: f64, n: usize) -> usize {
    let rank = (p * n as f64).ceil() as i64 - 1;
    rank.clamp(0, n as i64 - 1) as usize
}

/// Thread-safe bag of latency samples in microseconds.
///
/// A single lock around a growable array is enough at the volumes a single
/// generator produces (thousands of samples per second).
#[derive(Debug, Default)]
pub struct LatencyAccumulator {
    samples: Mutex<Vec<u64>>,
}

impl LatencyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u64>> {
        // A panicking writer cannot leave a Vec<u64> half-updated.
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one sample.
    pub fn add(&self, latency_us: u64) {
        self.lock().push(latency_us);
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Nearest-rank percentile in milliseconds, `p` in `(0, 1]`.
    ///
    /// Sorts a private copy; the stored samples are left untouched.
    /// Returns `0.0` when there are no samples.
    pub fn percentile(&self, p: f64) -> f64 {
        let mut sorted = self.lock().clone();
        percentile_of(&mut sorted, p)
    }

    /// p50/p95/p99 from a single snapshot of the samples.
    pub fn snapshot(&self) -> PercentileSnapshot {
        let mut sorted = self.lock().clone();
        sorted.sort_unstable();
        PercentileSnapshot {
            p50_ms: percentile_of_sorted(&sorted, 0.50),
            p95_ms: percentile_of_sorted(&sorted, 0.95),
            p99_ms: percentile_of_sorted(&sorted, 0.99),
        }
    }

    /// Clear all samples; later `add` calls start from empty.
    pub fn reset_window(&self) {
        self.lock().clear();
    }

    /// Snapshot p50/p95/p99 and clear in one critical section.
    ///
    /// Samples recorded while the reporter computes percentiles land in the
    /// next window instead of being dropped by a separate reset.
    pub fn drain_snapshot(&self) -> PercentileSnapshot {
        let mut taken = std::mem::take(&mut *self.lock());
        taken.sort_unstable();
        PercentileSnapshot {
            p50_ms: percentile_of_sorted(&taken, 0.50),
            p95_ms: percentile_of_sorted(&taken, 0.95),
            p99_ms: percentile_of_sorted(&taken, 0.99),
        }
    }
}

fn percentile_of(samples: &mut [u64], p: f64) -> f64 {
    samples.sort_unstable();
    percentile_of_sorted(samples, p)
}

fn percentile_of_sorted(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    sorted[nearest_rank_index(p, sorted.len())] as f64 / 1000.0
}

/// Full-run latency histogram (1µs to 60s, 3 significant digits).
pub struct CumulativeLatency {
    histogram: Mutex<Histogram<u64>>,
}

impl CumulativeLatency {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)
            .expect("Failed to create histogram");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Histogram<u64>> {
        self.histogram
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a latency in microseconds, clamped into the trackable range.
    pub fn add(&self, latency_us: u64) {
        let clamped = latency_us.clamp(1, MAX_TRACKABLE_US);
        if let Err(e) = self.lock().record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    pub fn count(&self) -> u64 {
        self.lock().len()
    }

    /// Percentile in milliseconds, `0.0` when nothing has been recorded.
    pub fn percentile(&self, p: f64) -> f64 {
        let hist = self.lock();
        if hist.is_empty() {
            return 0.0;
        }
        hist.value_at_quantile(p) as f64 / 1000.0
    }

    pub fn snapshot(&self) -> PercentileSnapshot {
        let hist = self.lock();
        if hist.is_empty() {
            return PercentileSnapshot::default();
        }
        PercentileSnapshot {
            p50_ms: hist.value_at_quantile(0.50) as f64 / 1000.0,
            p95_ms: hist.value_at_quantile(0.95) as f64 / 1000.0,
            p99_ms: hist.value_at_quantile(0.99) as f64 / 1000.0,
        }
    }
}

impl std::fmt::Debug for CumulativeLatency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CumulativeLatency")
            .field("count", &self.count())
            .finish()
    }
}

impl Default for CumulativeLatency {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn reference_percentile(samples: &[u64], p: f64) -> f64 {
        let mut sorted = samples.to_vec();
        sorted.sort();
        let n = sorted.len();
        let mut idx = (p * n as f64).ceil() as i64 - 1;
        if idx < 0 {
            idx = 0;
        }
        if idx as usize >= n {
            idx = n as i64 - 1;
        }
        sorted[idx as usize] as f64 / 1000.0
    }

    #[test]
    fn empty_accumulator_returns_zero() {
        let acc = LatencyAccumulator::new();
        assert_eq!(acc.percentile(0.5), 0.0);
        assert_eq!(acc.percentile(1.0), 0.0);
        assert_eq!(acc.snapshot(), PercentileSnapshot::default());
    }

    #[test]
    fn p100_is_maximum() {
        let acc = LatencyAccumulator::new();
        for us in [5_000, 1_000, 42_000, 7_000] {
            acc.add(us);
        }
        assert_eq!(acc.percentile(1.0), 42.0);
    }

    #[test]
    fn nearest_rank_on_ten_samples() {
        let acc = LatencyAccumulator::new();
        for ms in (1..=10).rev() {
            acc.add(ms * 1000);
        }
        assert_eq!(acc.percentile(0.5), 5.0);
        assert_eq!(acc.percentile(0.95), 10.0);
        assert_eq!(acc.percentile(0.1), 1.0);
        assert_eq!(acc.percentile(0.11), 2.0);
    }

    #[test]
    fn percentile_does_not_reorder_storage() {
        let acc = LatencyAccumulator::new();
        acc.add(3);
        acc.add(1);
        acc.add(2);
        let _ = acc.percentile(0.5);
        assert_eq!(*acc.samples.lock().unwrap(), vec![3, 1, 2]);
    }

    #[test]
    fn matches_reference_on_random_inputs() {
        let mut rng = rand::thread_rng();
        for n in [1usize, 2, 3, 17, 100, 999, 10_000] {
            let samples: Vec<u64> = (0..n).map(|_| rng.gen_range(0..5_000_000)).collect();
            let acc = LatencyAccumulator::new();
            for s in &samples {
                acc.add(*s);
            }
            let mut last = 0.0;
            for p in [0.01, 0.25, 0.5, 0.9, 0.95, 0.99, 0.999, 1.0] {
                let got = acc.percentile(p);
                assert_eq!(got, reference_percentile(&samples, p), "n={} p={}", n, p);
                assert!(got >= last, "percentile must be monotonic in p");
                last = got;
            }
        }
    }

    #[test]
    fn reset_window_empties() {
        let acc = LatencyAccumulator::new();
        acc.add(10_000);
        acc.reset_window();
        assert!(acc.is_empty());
        for p in [0.5, 0.95, 0.99, 1.0] {
            assert_eq!(acc.percentile(p), 0.0);
        }
    }

    #[test]
    fn drain_snapshot_returns_and_clears() {
        let acc = LatencyAccumulator::new();
        for ms in 1..=100 {
            acc.add(ms * 1000);
        }
        let snap = acc.drain_snapshot();
        assert_eq!(snap.p50_ms, 50.0);
        assert_eq!(snap.p95_ms, 95.0);
        assert_eq!(snap.p99_ms, 99.0);
        assert_eq!(acc.len(), 0);
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let acc = std::sync::Arc::new(LatencyAccumulator::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let acc = acc.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        acc.add(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(acc.len(), 8000);
    }

    #[test]
    fn cumulative_histogram_is_close_to_exact() {
        let hist = CumulativeLatency::new();
        assert_eq!(hist.percentile(0.5), 0.0);
        for ms in 1..=1000 {
            hist.add(ms * 1000);
        }
        assert_eq!(hist.count(), 1000);
        let snap = hist.snapshot();
        assert!((snap.p50_ms - 500.0).abs() < 1.0, "p50 was {}", snap.p50_ms);
        assert!((snap.p99_ms - 990.0).abs() < 1.5, "p99 was {}", snap.p99_ms);
    }

    #[test]
    fn cumulative_histogram_clamps_out_of_range() {
        let hist = CumulativeLatency::new();
        hist.add(0);
        hist.add(120_000_000);
        assert_eq!(hist.count(), 2);
    }
}
