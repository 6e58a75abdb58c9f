//! Cache Construction
//!
//! The only way to obtain a durable cache: every build wraps the chunked
//! tier in an LZ4 integrity layer, so nothing can write an unverified or
//! uncompressed payload to the warehouse. The chunked tier gets the same
//! envelope check so it never promotes a partial generation to the warm tier.
//!
//! ```text
//! IntegrityCache ──▶ ChunkedCache ──┬──▶ warm tier (optional)
//!                                   └──▶ Warehouse
//! ```

use std::sync::Arc;

use tracing::info;

use super::compression::{Lz4Compressor, DEFAULT_LZ4_LEVEL, MAX_LZ4_LEVEL};
use super::durable::{ChunkedCache, ChunkedCacheConfig, EnvelopeCheck};
use super::integrity::{open_envelope, IntegrityCache, DEFAULT_KEY_PREFIX};
use super::metrics::NoopMetrics;
use super::warehouse::Warehouse;
use crate::config::CacheSettings;
use crate::domain::{Cache, Clock, MetricsSink, SystemClock};
use crate::error::{Error, Result};

/// Builder for the layered cache
pub struct CacheBuilder {
    warehouse: Arc<dyn Warehouse>,
    warm: Option<Arc<dyn Cache>>,
    config: ChunkedCacheConfig,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    compression_level: i32,
    key_prefix: String,
}

impl CacheBuilder {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            warehouse,
            warm: None,
            config: ChunkedCacheConfig::default(),
            metrics: Arc::new(NoopMetrics),
            clock: Arc::new(SystemClock),
            compression_level: DEFAULT_LZ4_LEVEL,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn warm_tier(mut self, warm: Arc<dyn Cache>) -> Self {
        self.warm = Some(warm);
        self
    }

    pub fn config(mut self, config: ChunkedCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply durable, compression and key-prefix settings.
    pub fn settings(mut self, settings: &CacheSettings) -> Result<Self> {
        settings.validate()?;
        self.config = settings.to_chunked_config()?;
        self.compression_level = settings.compression_level;
        self.key_prefix = settings.key_prefix.clone();
        Ok(self)
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// LZ4 high-compression level; payloads are always compressed.
    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Build and keep the concrete layer types.
    pub fn build_layered(self) -> Result<IntegrityCache<ChunkedCache>> {
        if !(0..=MAX_LZ4_LEVEL).contains(&self.compression_level) {
            return Err(Error::Config(format!(
                "compression level {} outside [0, {}]",
                self.compression_level, MAX_LZ4_LEVEL
            )));
        }
        info!(
            read_only = self.config.read_only,
            force_persistent_lookup = self.config.force_persistent_lookup,
            warm_tier = self.warm.is_some(),
            chunk_size = self.config.chunk_size,
            compression_level = self.compression_level,
            "building report cache"
        );

        let verifier = Lz4Compressor::with_level(self.compression_level);
        let verify: EnvelopeCheck =
            Arc::new(move |envelope: &[u8]| open_envelope(&verifier, envelope).map(|_| ()));

        let durable = ChunkedCache::new(self.warehouse, self.warm, self.config)?
            .with_metrics(self.metrics.clone())
            .with_clock(self.clock)
            .with_envelope_check(verify);

        Ok(IntegrityCache::new(durable)
            .with_compressor(Box::new(Lz4Compressor::with_level(self.compression_level)))
            .with_key_prefix(self.key_prefix)
            .with_metrics(self.metrics))
    }

    /// Build the cache as the single shared handle.
    pub fn build(self) -> Result<Arc<dyn Cache>> {
        Ok(Arc::new(self.build_layered()?))
    }
}

/// Assemble the layered cache from loaded settings.
pub fn build_cache(
    warehouse: Arc<dyn Warehouse>,
    warm: Option<Arc<dyn Cache>>,
    settings: &CacheSettings,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Arc<dyn Cache>> {
    let mut builder = CacheBuilder::new(warehouse)
        .settings(settings)?
        .metrics(metrics);
    if let Some(warm) = warm {
        builder = builder.warm_tier(warm);
    }
    builder.build()
}
