//! Integrity/Compression Layer
//!
//! Wraps any [`Cache`] so that every stored payload is compressed and every
//! read is self-verifying. The stored envelope is
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────┐
//! │ compressed(payload)          │ xxh3_128(payload) (16 B) │
//! └──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! The digest covers the uncompressed payload and is recomputed after
//! decompression, so both a corrupt compressed stream and a bad
//! decompression are caught. Keys are namespaced with a fixed prefix to stay
//! clear of co-tenants of the wrapped store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_128;

use super::compression::{Compressor, Lz4Compressor};
use super::metrics::{counters, NoopMetrics};
use crate::domain::{Cache, CallContext, MetricsSink};
use crate::error::{Error, Result};

/// Digest length appended to every envelope.
pub const DIGEST_LEN: usize = 16;

/// Namespace prefix applied to every key passed to the wrapped cache.
pub const DEFAULT_KEY_PREFIX: &str = "cc~";

fn digest(data: &[u8]) -> u128 {
    xxh3_128(data)
}

/// Compressing, checksumming wrapper around another cache tier.
pub struct IntegrityCache<C> {
    inner: C,
    compressor: Box<dyn Compressor>,
    key_prefix: String,
    metrics: Arc<dyn MetricsSink>,
}

impl<C: Cache> IntegrityCache<C> {
    /// Wrap `inner` with LZ4 compression and the default key prefix.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            compressor: Box::new(Lz4Compressor::new()),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_compressor(mut self, compressor: Box<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The wrapped tier.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Key as seen by the wrapped tier.
    pub fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Build the stored envelope for `content`.
    pub fn seal(&self, content: &[u8]) -> Result<Bytes> {
        let sum = digest(content);
        let compressed = self.compressor.compress(content)?;

        let mut envelope = BytesMut::with_capacity(compressed.len() + DIGEST_LEN);
        envelope.put_slice(&compressed);
        envelope.put_u128(sum);

        debug!(
            algorithm = %self.compressor.algorithm(),
            original = content.len(),
            compressed = compressed.len(),
            ratio = compressed.len() as f64 / content.len().max(1) as f64,
            "compressed cache payload"
        );

        Ok(envelope.freeze())
    }

    /// Verify and decompress a stored envelope.
    pub fn open(&self, envelope: &[u8]) -> Result<Bytes> {
        open_envelope(self.compressor.as_ref(), envelope)
    }
}

/// Verify and decompress `envelope` with `compressor`.
///
/// Shared by the integrity layer and by the durable tier, which checks a
/// reassembled generation before promoting it to the warm tier.
pub fn open_envelope(compressor: &dyn Compressor, envelope: &[u8]) -> Result<Bytes> {
    if envelope.len() < DIGEST_LEN {
        return Err(Error::UnderflowCorruption {
            len: envelope.len(),
            min: DIGEST_LEN,
        });
    }

    let (compressed, stored) = envelope.split_at(envelope.len() - DIGEST_LEN);
    let mut stored_digest = [0u8; DIGEST_LEN];
    stored_digest.copy_from_slice(stored);
    let expected = u128::from_be_bytes(stored_digest);

    let content = compressor.decompress(compressed)?;
    let actual = digest(&content);
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            expected: format!("{:032x}", expected),
            actual: format!("{:032x}", actual),
        });
    }

    Ok(Bytes::from(content))
}

#[async_trait]
impl<C: Cache> Cache for IntegrityCache<C> {
    async fn get(
        &self,
        ctx: &CallContext,
        key: &str,
        ttl_hint: Duration,
    ) -> Result<Option<Bytes>> {
        let envelope = match self.inner.get(ctx, &self.namespaced(key), ttl_hint).await? {
            Some(envelope) => envelope,
            None => return Ok(None),
        };

        match self.open(&envelope) {
            Ok(content) => Ok(Some(content)),
            Err(e) => {
                if e.is_corruption() {
                    self.metrics.increment(counters::CORRUPTION);
                }
                warn!(key, error = %e, "cached payload failed verification");
                Err(e)
            }
        }
    }

    async fn set(
        &self,
        ctx: &CallContext,
        key: &str,
        content: Bytes,
        duration: Duration,
    ) -> Result<()> {
        if content.is_empty() {
            self.metrics.increment(counters::EMPTY_SET);
            debug!(key, "skipping cache set of empty payload");
            return Ok(());
        }

        let envelope = self.seal(&content)?;
        self.inner
            .set(ctx, &self.namespaced(key), envelope, duration)
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================
