//! Warm Tier
//!
//! Fast, TTL-native key/value tier layered in front of the durable tier.
//! Production deployments plug in a managed remote store; this module
//! provides the in-process implementation used for local runs and tests,
//! and an adapter for stores whose read path takes no duration.
//!
//! # Design
//!
//! - Last-write-wins, overwrite on set
//! - Expiry enforced lazily on read against the injected [`Clock`]
//! - Expired entries swept every [`PURGE_INTERVAL`] sets, so keys written
//!   once and never read again do not accumulate

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::domain::{add_duration, Cache, CallContext, Clock, SystemClock};
use crate::error::{Error, Result};

/// Number of sets between sweeps of expired entries.
pub const PURGE_INTERVAL: u64 = 256;

/// A stored warm entry.
#[derive(Debug, Clone)]
struct WarmEntry {
    data: Bytes,
    ttl: Duration,
    expires_at: DateTime<Utc>,
}

/// In-process warm tier.
///
/// Uses DashMap for sharded concurrent access.
pub struct InMemoryWarmCache {
    entries: DashMap<String, WarmEntry>,
    clock: Arc<dyn Clock>,
    /// Inject failures on every call
    failing: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl Default for InMemoryWarmCache {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryWarmCache {
    /// Create a warm cache on the system clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a warm cache on the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            failing: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        }
    }

    /// Make every subsequent call fail with [`Error::WarmTier`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::WarmTier("connection refused".into()));
        }
        Ok(())
    }

    /// TTL recorded by the most recent set of `key`, if still live
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.ttl)
    }

    /// Whether `key` holds a live entry
    pub fn contains(&self, key: &str) -> bool {
        self.ttl_of(key).is_some()
    }

    /// Number of stored entries, including ones expired but not yet read
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, remaining = self.entries.len(), "purged expired warm entries");
        }
        purged
    }
}

#[async_trait]
impl Cache for InMemoryWarmCache {
    async fn get(
        &self,
        _ctx: &CallContext,
        key: &str,
        _ttl_hint: Duration,
    ) -> Result<Option<Bytes>> {
        self.check_available()?;
        let now = self.clock.now();

        let found = self.entries.get(key).map(|e| e.value().clone());
        match found {
            Some(entry) if entry.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.data))
            }
            Some(_) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        _ctx: &CallContext,
        key: &str,
        content: Bytes,
        duration: Duration,
    ) -> Result<()> {
        self.check_available()?;
        let sets = self.sets.fetch_add(1, Ordering::Relaxed) + 1;
        if sets % PURGE_INTERVAL == 0 {
            self.purge_expired();
        }

        if duration.is_zero() {
            self.entries.remove(key);
            return Ok(());
        }

        let expires_at = add_duration(self.clock.now(), duration);
        self.entries.insert(
            key.to_string(),
            WarmEntry {
                data: content,
                ttl: duration,
                expires_at,
            },
        );
        Ok(())
    }
}

// =============================================================================
// Duration-less Store Adapter
// =============================================================================

/// A TTL-native store whose read path takes no duration, such as a remote
/// key/value service client.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>>;

    async fn store(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;
}

/// Presents a [`KeyValueStore`] as a [`Cache`].
///
/// The read-side duration is dropped here so that only one cache shape is
/// seen by the tiers above. Each call runs under the caller's context.
pub struct KeyValueWarmTier<S> {
    store: S,
}

impl<S: KeyValueStore> KeyValueWarmTier<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: KeyValueStore> Cache for KeyValueWarmTier<S> {
    async fn get(
        &self,
        ctx: &CallContext,
        key: &str,
        _ttl_hint: Duration,
    ) -> Result<Option<Bytes>> {
        ctx.run(self.store.fetch(key)).await
    }

    async fn set(
        &self,
        ctx: &CallContext,
        key: &str,
        content: Bytes,
        duration: Duration,
    ) -> Result<()> {
        ctx.run(self.store.store(key, content, duration)).await
    }
}

// =============================================================================
// Tests
// =============================================================================
