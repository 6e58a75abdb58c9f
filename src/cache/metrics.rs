//! Cache Metrics Collection
//!
//! [`MetricsSink`] implementations for the cache tiers: an in-process
//! collector for tests and local runs, a no-op sink, and a Prometheus-backed
//! sink for services that already expose a registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use prometheus::{IntCounterVec, Opts, Registry};

use crate::domain::MetricsSink;
use crate::error::{Error, Result};

/// Counter names emitted by the cache tiers.
pub mod counters {
    /// Every `get` reaching the durable tier
    pub const CACHE_GET: &str = "cache_get";
    /// Every `set` reaching the durable tier
    pub const CACHE_SET: &str = "cache_set";
    pub const WARM_HIT: &str = "warm_hit";
    pub const WARM_MISS: &str = "warm_miss";
    pub const DURABLE_HIT: &str = "durable_hit";
    pub const DURABLE_MISS: &str = "durable_miss";
    /// Generations fully written to the warehouse
    pub const DURABLE_SET: &str = "durable_set";
    /// Durable writes suppressed by read-only mode
    pub const BLOCKED_WRITE: &str = "blocked_write";
    /// Durable hits copied into the warm tier
    pub const WARM_BACKFILL: &str = "warm_backfill";
    /// Envelopes that failed verification
    pub const CORRUPTION: &str = "corruption";
    /// Sets skipped because the payload was empty
    pub const EMPTY_SET: &str = "empty_set";

    pub const ALL: &[&str] = &[
        CACHE_GET,
        CACHE_SET,
        WARM_HIT,
        WARM_MISS,
        DURABLE_HIT,
        DURABLE_MISS,
        DURABLE_SET,
        BLOCKED_WRITE,
        WARM_BACKFILL,
        CORRUPTION,
        EMPTY_SET,
    ];
}

// =============================================================================
// In-Process Collector
// =============================================================================

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    counters: DashMap<String, AtomicU64>,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `counter`, zero if never incremented.
    pub fn get(&self, counter: &str) -> u64 {
        self.counters
            .get(counter)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Fraction of durable-tier gets answered by either tier.
    pub fn hit_ratio(&self) -> f64 {
        let hits = (self.get(counters::WARM_HIT) + self.get(counters::DURABLE_HIT)) as f64;
        let total = self.get(counters::CACHE_GET) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            counters,
            hit_ratio: self.hit_ratio(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.counters.clear();
    }
}

impl MetricsSink for CacheMetrics {
    fn increment(&self, counter: &str) {
        if let Some(c) = self.counters.get(counter) {
            c.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(counter.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub hit_ratio: f64,
}

// =============================================================================
// No-Op Sink
// =============================================================================

/// Discards every increment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: &str) {}
}

// =============================================================================
// Prometheus Sink
// =============================================================================

/// Forwards increments to a labelled Prometheus counter
/// (`report_cache_events_total{counter="..."}`).
#[derive(Clone, Debug)]
pub struct PrometheusMetricsSink {
    events: IntCounterVec,
}

impl PrometheusMetricsSink {
    pub const METRIC_NAME: &'static str = "report_cache_events_total";

    /// Create the counter family and register it with `registry`.
    pub fn new(registry: &Registry) -> Result<Self> {
        let events = IntCounterVec::new(
            Opts::new(Self::METRIC_NAME, "Report cache events by counter name"),
            &["counter"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        registry
            .register(Box::new(events.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;

        Ok(Self { events })
    }

    /// Current value for `counter`.
    pub fn value(&self, counter: &str) -> u64 {
        self.events.with_label_values(&[counter]).get()
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn increment(&self, counter: &str) {
        self.events.with_label_values(&[counter]).inc();
    }
}

// =============================================================================
// Latency Tracker
// =============================================================================

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed milliseconds, for log fields
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

// =============================================================================
// Tests
// =============================================================================
