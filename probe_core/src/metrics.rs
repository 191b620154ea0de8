//! Executor metrics for executions, timing, and cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Kind of metric being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Probe invocation that ran to completion
    Execution,
    /// Outcome served from the result cache
    CacheHit,
    /// Cache lookup that found nothing fresh
    CacheMiss,
    /// Outcome supplied by the async results collaborator
    AsyncHit,
    /// Request that joined an execution already in flight
    Coalesced,
    /// Check reported as still running when the wait budget ran out
    Timeout,
    /// Probe error, panic or retrieval failure
    ExecutionError,
}

const KIND_COUNT: usize = 7;

/// Executor metrics collector.
///
/// Counters are updated with relaxed atomics; a summary is a best-effort
/// snapshot, not a consistent cut.
#[derive(Clone, Debug)]
pub struct ExecutorMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Counts by kind
    counts: [AtomicU64; KIND_COUNT],
    /// Total probe run time (nanoseconds)
    total_time_ns: AtomicU64,
}

impl ExecutorMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                counts: std::array::from_fn(|_| AtomicU64::new(0)),
                total_time_ns: AtomicU64::new(0),
            }),
        }
    }

    /// Records a metric occurrence.
    pub fn record(&self, kind: MetricKind) {
        self.inner.counts[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Records a finished probe run.
    pub fn record_execution(&self, duration: Duration) {
        self.record(MetricKind::Execution);
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.inner.total_time_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Records a cache lookup.
    pub fn record_cache_access(&self, hit: bool) {
        if hit {
            self.record(MetricKind::CacheHit);
        } else {
            self.record(MetricKind::CacheMiss);
        }
    }

    /// Gets the count for a specific metric.
    pub fn count(&self, kind: MetricKind) -> u64 {
        self.inner.counts[kind as usize].load(Ordering::Relaxed)
    }

    /// Gets the total probe run time.
    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.inner.total_time_ns.load(Ordering::Relaxed))
    }

    /// Gets the cache hit rate (0.0 to 1.0).
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.count(MetricKind::CacheHit);
        let misses = self.count(MetricKind::CacheMiss);
        let total = hits + misses;

        if total == 0 {
            return 0.0;
        }

        hits as f64 / total as f64
    }

    /// Gets all metrics as a summary.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            executions: self.count(MetricKind::Execution),
            cache_hits: self.count(MetricKind::CacheHit),
            async_hits: self.count(MetricKind::AsyncHit),
            coalesced: self.count(MetricKind::Coalesced),
            timeouts: self.count(MetricKind::Timeout),
            execution_errors: self.count(MetricKind::ExecutionError),
            total_time: self.total_time(),
            cache_hit_rate: self.cache_hit_rate(),
        }
    }

    /// Resets all metrics to zero.
    pub fn reset(&self) {
        for count in &self.inner.counts {
            count.store(0, Ordering::Relaxed);
        }
        self.inner.total_time_ns.store(0, Ordering::Relaxed);
    }
}

impl Default for ExecutorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of executor metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    /// Number of probe runs completed
    pub executions: u64,
    /// Number of outcomes served from cache
    pub cache_hits: u64,
    /// Number of outcomes supplied by async results
    pub async_hits: u64,
    /// Number of requests that joined a running execution
    pub coalesced: u64,
    /// Number of timeout outcomes reported
    pub timeouts: u64,
    /// Number of execution error outcomes produced
    pub execution_errors: u64,
    /// Total probe run time
    pub total_time: Duration,
    /// Cache hit rate (0.0 to 1.0)
    pub cache_hit_rate: f64,
}
