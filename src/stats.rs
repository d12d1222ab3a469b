//! Shared per-run state: request counters, the active-concurrency threshold
//! and the two latency accumulators.
//!
//! One [`RunState`] is built per run and handed to the controller, the
//! workers and the reporter behind an `Arc`, so several runs can coexist in a
//! single process.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::percentiles::{CumulativeLatency, LatencyAccumulator};

/// Request and goodput counters.
///
/// Many workers increment concurrently; the reporter swaps the window
/// counters to zero once per second and reads the totals at the end.
#[derive(Debug, Default)]
pub struct RunCounters {
    total_requests: AtomicU64,
    total_good: AtomicU64,
    window_requests: AtomicU64,
    window_good: AtomicU64,
}

/// Counts taken from one window drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub requests: u64,
    pub good: u64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one finished request, good or not.
    pub fn record(&self, good: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.window_requests.fetch_add(1, Ordering::Relaxed);
        if good {
            self.total_good.fetch_add(1, Ordering::Relaxed);
            self.window_good.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Swap the window counters to zero and return what they held.
    pub fn drain_window(&self) -> WindowCounts {
        WindowCounts {
            requests: self.window_requests.swap(0, Ordering::Relaxed),
            good: self.window_good.swap(0, Ordering::Relaxed),
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_good(&self) -> u64 {
        self.total_good.load(Ordering::Relaxed)
    }
}

/// Number of workers currently allowed to have a request outstanding.
///
/// Single writer (the controller), many readers (every worker). Readers only
/// need an eventually consistent view; a one-tick-stale value is fine.
#[derive(Debug)]
pub struct ActiveConcurrency {
    value: AtomicUsize,
    capacity: usize,
}

impl ActiveConcurrency {
    pub fn new(capacity: usize) -> Self {
        Self {
            value: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Publish a new threshold, clamped to the pool capacity.
    pub fn publish(&self, target: usize) -> usize {
        let clamped = target.min(self.capacity);
        self.value.store(clamped, Ordering::Relaxed);
        clamped
    }

    pub fn get(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the worker with identity `worker_id` may issue a request.
    pub fn admits(&self, worker_id: usize) -> bool {
        worker_id < self.get()
    }
}

/// Everything the workers write and the reporter reads for one run.
#[derive(Debug)]
pub struct RunState {
    pub counters: RunCounters,
    pub active: ActiveConcurrency,
    /// Per-second latencies, drained by the reporter every tick.
    pub window_latency: LatencyAccumulator,
    /// Full-run latencies for the final summary; never reset.
    pub total_latency: CumulativeLatency,
    sla_us: u64,
}

impl RunState {
    pub fn new(pool_capacity: usize, sla_ms: u64) -> Self {
        Self {
            counters: RunCounters::new(),
            active: ActiveConcurrency::new(pool_capacity),
            window_latency: LatencyAccumulator::new(),
            total_latency: CumulativeLatency::new(),
            sla_us: sla_ms.saturating_mul(1000),
        }
    }

    pub fn sla_us(&self) -> u64 {
        self.sla_us
    }

    /// Whether a response counts towards goodput.
    pub fn is_good(&self, status: Option<u16>, latency_us: u64) -> bool {
        matches!(status, Some(200..=299)) && latency_us <= self.sla_us
    }

    /// Record one finished request.
    ///
    /// `status` is `None` when the transport failed. The latency sample and
    /// request counters are always updated; errors count as bad requests.
    /// Returns whether the request was good.
    pub fn record_outcome(&self, status: Option<u16>, latency_us: u64) -> bool {
        let good = self.is_good(status, latency_us);
        self.window_latency.add(latency_us);
        self.total_latency.add(latency_us);
        self.counters.record(good);
        good
    }
}
