//! Durable Chunked Cache
//!
//! Warehouse-backed [`Cache`] with an optional warm tier in front. Payloads
//! are split into row-sized chunks; each `set` appends one generation and
//! nothing is ever updated or deleted in place.
//!
//! # Read path
//!
//! ```text
//! get(key, d)
//!   │
//!   ├─ warm tier (if d < min or !force_persistent_lookup) ── hit ──▶ return
//!   │
//!   ├─ d < min ─────────────────────────────────────────────────▶ miss
//!   │
//!   ├─ probe: newest unexpired generation in [now - max, now + tol]
//!   ├─ fetch: rows of (key, generation_id) in [modified_at ± tol]
//!   ├─ reassemble by chunk_index
//!   ├─ verify envelope (only when a warm tier will be backfilled)
//!   └─ backfill warm tier with TTL = expiration_at - now
//! ```
//!
//! The fetch always filters on `generation_id` equality. The partition
//! window only prunes the scan, so two generations written within the
//! tolerance of each other are never spliced together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::metrics::{counters, LatencyTracker, NoopMetrics};
use super::record::{reassemble, split_chunks, ChunkRecord};
use super::warehouse::{ChunkQuery, Warehouse};
use crate::domain::{add_duration, sub_duration, Cache, CallContext, Clock, MetricsSink, SystemClock};
use crate::error::{Error, Result};

/// Default chunk size, leaving headroom under a 10 MB streaming-insert row limit.
pub const DEFAULT_CHUNK_SIZE: usize = 7_000_000;

/// Default skew allowed between the probe and the chunk fetch.
pub const DEFAULT_PARTITION_TOLERANCE: Duration = Duration::from_secs(5);

/// Default look-back bound for the probe (14 days).
pub const DEFAULT_MAX_EXPIRATION: Duration = Duration::from_secs(14 * 24 * 3600);

/// Default threshold below which only the warm tier is used (1 hour).
pub const DEFAULT_MIN_EXPIRATION: Duration = Duration::from_secs(3600);

/// Construction-time settings of a [`ChunkedCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedCacheConfig {
    /// Longest lifetime ever looked back for; bounds the probe's partition scan
    pub max_expiration: Duration,
    /// Requests shorter than this never touch the warehouse
    pub min_expiration: Duration,
    /// Suppress every durable write
    pub read_only: bool,
    /// Ignore the warm tier on reads at or above `min_expiration`
    pub force_persistent_lookup: bool,
    /// Maximum bytes per chunk row
    pub chunk_size: usize,
    /// Half-width of the partition window around a generation's `modified_at`
    pub partition_tolerance: Duration,
}

impl Default for ChunkedCacheConfig {
    fn default() -> Self {
        Self {
            max_expiration: DEFAULT_MAX_EXPIRATION,
            min_expiration: DEFAULT_MIN_EXPIRATION,
            read_only: false,
            force_persistent_lookup: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            partition_tolerance: DEFAULT_PARTITION_TOLERANCE,
        }
    }
}

impl ChunkedCacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.max_expiration.is_zero() {
            return Err(Error::Config("max_expiration must be positive".into()));
        }
        if self.min_expiration > self.max_expiration {
            return Err(Error::Config(format!(
                "min_expiration ({:?}) exceeds max_expiration ({:?})",
                self.min_expiration, self.max_expiration
            )));
        }
        Ok(())
    }
}

/// Verifies a reassembled payload before it is promoted to the warm tier.
///
/// Gap detection alone cannot see a generation whose trailing chunks were
/// never written; the envelope digest can.
pub(crate) type EnvelopeCheck = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

/// Warehouse-backed cache tier.
///
/// Only constructed through [`super::builder::CacheBuilder`], which always
/// wraps it in the integrity layer.
pub struct ChunkedCache {
    warehouse: Arc<dyn Warehouse>,
    warm: Option<Arc<dyn Cache>>,
    config: ChunkedCacheConfig,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    verify: Option<EnvelopeCheck>,
}

impl ChunkedCache {
    pub(crate) fn new(
        warehouse: Arc<dyn Warehouse>,
        warm: Option<Arc<dyn Cache>>,
        config: ChunkedCacheConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            warehouse,
            warm,
            config,
            metrics: Arc::new(NoopMetrics),
            clock: Arc::new(SystemClock),
            verify: None,
        })
    }

    pub(crate) fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn with_envelope_check(mut self, verify: EnvelopeCheck) -> Self {
        self.verify = Some(verify);
        self
    }

    pub fn config(&self) -> &ChunkedCacheConfig {
        &self.config
    }

    pub fn has_warm_tier(&self) -> bool {
        self.warm.is_some()
    }

    fn below_threshold(&self, duration: Duration) -> bool {
        duration < self.config.min_expiration
    }

    async fn warm_get(
        &self,
        warm: &dyn Cache,
        ctx: &CallContext,
        key: &str,
        duration: Duration,
    ) -> Option<Bytes> {
        match ctx.run(warm.get(ctx, key, duration)).await {
            Ok(Some(data)) => {
                self.metrics.increment(counters::WARM_HIT);
                debug!(key, bytes = data.len(), "warm tier hit");
                Some(data)
            }
            Ok(None) => {
                self.metrics.increment(counters::WARM_MISS);
                None
            }
            Err(e) => {
                self.metrics.increment(counters::WARM_MISS);
                warn!(key, error = %e, "warm tier get failed, falling through");
                None
            }
        }
    }

    /// Probe, fetch and reassemble the newest unexpired generation.
    async fn durable_get(&self, ctx: &CallContext, key: &str) -> Result<Option<Bytes>> {
        let now = self.clock.now();
        let tolerance = self.config.partition_tolerance;
        let tracker = LatencyTracker::start();

        let probe = ChunkQuery::latest_generation(
            key,
            sub_duration(now, self.config.max_expiration),
            add_duration(now, tolerance),
            now,
        );
        let meta = match ctx.run(self.warehouse.latest_generation(ctx, &probe)).await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                self.metrics.increment(counters::DURABLE_MISS);
                debug!(key, elapsed_ms = tracker.elapsed_ms(), "durable tier miss");
                return Ok(None);
            }
            Err(e) => {
                error!(key, error = %e, elapsed_ms = tracker.elapsed_ms(), "durable probe failed");
                return Err(e);
            }
        };

        let fetch = ChunkQuery::generation_chunks(
            key,
            meta.generation_id.as_str(),
            sub_duration(meta.modified_at, tolerance),
            add_duration(meta.modified_at, tolerance),
        );
        let rows = ctx
            .run(self.warehouse.fetch_chunks(ctx, &fetch))
            .await
            .map_err(|e| {
                error!(key, generation_id = %meta.generation_id, error = %e, "durable chunk fetch failed");
                e
            })?;

        if rows.is_empty() {
            let e = Error::IncompleteGeneration {
                key: key.to_string(),
                generation_id: meta.generation_id.clone(),
                reason: "probe matched but no chunks were returned".into(),
            };
            error!(key, error = %e, "durable reconstruction failed");
            return Err(e);
        }

        let chunks = rows.len();
        let data = reassemble(key, &meta.generation_id, rows).map_err(|e| {
            error!(key, error = %e, "durable reconstruction failed");
            e
        })?;

        // A warm copy would outlive any repair of the durable rows.
        if let (Some(_), Some(verify)) = (&self.warm, &self.verify) {
            if let Err(e) = verify(&data[..]) {
                self.metrics.increment(counters::CORRUPTION);
                error!(
                    key,
                    generation_id = %meta.generation_id,
                    chunks,
                    error = %e,
                    "reassembled generation failed verification, not promoting"
                );
                return Err(e);
            }
        }

        self.metrics.increment(counters::DURABLE_HIT);
        info!(
            key,
            generation_id = %meta.generation_id,
            chunks,
            bytes = data.len(),
            elapsed_ms = tracker.elapsed_ms(),
            "durable tier hit"
        );

        if let Some(warm) = &self.warm {
            match meta.remaining(now) {
                Some(ttl) => match ctx.run(warm.set(ctx, key, data.clone(), ttl)).await {
                    Ok(()) => self.metrics.increment(counters::WARM_BACKFILL),
                    Err(e) => warn!(key, error = %e, "warm tier backfill failed"),
                },
                None => debug!(key, "entry expired during read, skipping backfill"),
            }
        }

        Ok(Some(data))
    }

    /// Append one generation for `content`.
    async fn durable_set(
        &self,
        ctx: &CallContext,
        key: &str,
        content: &Bytes,
        duration: Duration,
    ) -> Result<()> {
        let generation_id = Uuid::new_v4().to_string();
        let modified_at = self.clock.now();
        let expiration_at = add_duration(modified_at, duration);
        let chunks = split_chunks(content, self.config.chunk_size);
        let total = chunks.len();
        let tracker = LatencyTracker::start();

        for (index, data) in chunks.into_iter().enumerate() {
            let record = ChunkRecord {
                key: key.to_string(),
                generation_id: generation_id.clone(),
                modified_at,
                expiration_at,
                chunk_index: index as u32,
                data,
            };

            if let Err(e) = ctx.run(self.warehouse.insert(ctx, &record)).await {
                error!(
                    key,
                    generation_id = %generation_id,
                    chunk_index = index,
                    total,
                    error = %e,
                    "durable insert failed"
                );
                if index == 0 {
                    return Err(e);
                }
                return Err(Error::PartialWrite {
                    key: key.to_string(),
                    generation_id,
                    written: index,
                    total,
                    reason: e.to_string(),
                });
            }
        }

        self.metrics.increment(counters::DURABLE_SET);
        info!(
            key,
            generation_id = %generation_id,
            chunks = total,
            bytes = content.len(),
            elapsed_ms = tracker.elapsed_ms(),
            "durable tier write complete"
        );
        Ok(())
    }
}

#[async_trait]
impl Cache for ChunkedCache {
    async fn get(
        &self,
        ctx: &CallContext,
        key: &str,
        duration: Duration,
    ) -> Result<Option<Bytes>> {
        self.metrics.increment(counters::CACHE_GET);
        let below = self.below_threshold(duration);

        if let Some(warm) = &self.warm {
            if below || !self.config.force_persistent_lookup {
                if let Some(data) = self.warm_get(warm.as_ref(), ctx, key, duration).await {
                    return Ok(Some(data));
                }
            }
        }

        if below {
            debug!(key, ?duration, "below durable threshold, skipping warehouse");
            return Ok(None);
        }

        self.durable_get(ctx, key).await
    }

    async fn set(
        &self,
        ctx: &CallContext,
        key: &str,
        content: Bytes,
        duration: Duration,
    ) -> Result<()> {
        self.metrics.increment(counters::CACHE_SET);

        if let Some(warm) = &self.warm {
            if let Err(e) = ctx.run(warm.set(ctx, key, content.clone(), duration)).await {
                warn!(key, error = %e, "warm tier set failed, continuing with durable write");
            }
        }

        if self.below_threshold(duration) {
            debug!(key, ?duration, "below durable threshold, skipping warehouse");
            return Ok(());
        }

        if self.config.read_only {
            self.metrics.increment(counters::BLOCKED_WRITE);
            warn!(key, "durable write blocked: cache is read-only");
            return Ok(());
        }

        if content.is_empty() {
            debug!(key, "empty payload, skipping durable write");
            return Ok(());
        }

        self.durable_set(ctx, key, &content, duration).await
    }
}

// =============================================================================
// Tests
// =============================================================================
