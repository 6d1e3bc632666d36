//! Atomic metrics for hook dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Thread-safe atomic counter.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Simple histogram using fixed buckets.
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    bucket_bounds: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bucket_bounds: Vec<f64>) -> Self {
        let buckets = (0..=bucket_bounds.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            buckets,
            bucket_bounds,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Millisecond buckets.
    pub fn default_latency() -> Self {
        Self::new(vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0,
        ])
    }

    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .bucket_bounds
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.bucket_bounds.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        (self.sum.load(Ordering::Relaxed) as f64 / 1000.0) / count as f64
    }

}

impl Default for Histogram {
    fn default() -> Self {
        Self::default_latency()
    }
}

/// Counters updated by the dispatcher.
#[derive(Default)]
pub struct HookMetrics {
    pub dispatches: Counter,
    pub invocations: Counter,
    pub failures: Counter,
    pub timeouts: Counter,
    pub aborts: Counter,
    pub cancellations: Counter,
    pub handler_latency_ms: Histogram,
}

impl HookMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invocation(&self, elapsed: Duration, success: bool, timed_out: bool) {
        self.invocations.inc();
        self.handler_latency_ms
            .observe(elapsed.as_secs_f64() * 1000.0);
        if !success {
            self.failures.inc();
        }
        if timed_out {
            self.timeouts.inc();
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            dispatches: self.dispatches.get(),
            invocations: self.invocations.get(),
            failures: self.failures.get(),
            timeouts: self.timeouts.get(),
            aborts: self.aborts.get(),
            cancellations: self.cancellations.get(),
            avg_handler_ms: self.handler_latency_ms.mean(),
        }
    }
}

impl std::fmt::Debug for HookMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMetrics")
            .field("summary", &self.summary())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub dispatches: u64,
    pub invocations: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub aborts: u64,
    pub cancellations: u64,
    pub avg_handler_ms: f64,
}
