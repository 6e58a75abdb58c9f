//! Domain Ports (Port/Adapter Pattern)
//!
//! Core abstractions the cache tiers depend on. Every tier implements
//! [`Cache`]; infrastructure concerns (time, metrics) are injected through
//! [`Clock`] and [`MetricsSink`] instead of living in process-wide state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │        Cache  │  MetricsSink  │  Clock               │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  IntegrityCache │ ChunkedCache │ WarmTier │ Metrics │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::context::CallContext;
use crate::error::Result;

// =============================================================================
// Cache Port
// =============================================================================

/// Port satisfied by every cache tier and consumed by report generators.
///
/// `Ok(None)` from [`Cache::get`] is a normal miss. The `ttl_hint` passed to
/// `get` is the duration the caller intends to cache the value for; composed
/// tiers use it to decide which tier is eligible, never to reject a hit as
/// stale.
///
/// # Example
///
/// ```ignore
/// let ctx = CallContext::with_timeout(Duration::from_secs(30));
/// match cache.get(&ctx, "report~{..}", Duration::from_secs(8 * 3600)).await {
///     Ok(Some(bytes)) => decode(bytes),
///     Ok(None) | Err(_) => recompute(),
/// }
/// ```
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up `key`.
    async fn get(&self, ctx: &CallContext, key: &str, ttl_hint: Duration)
        -> Result<Option<Bytes>>;

    /// Store `content` under `key` for `duration` from now.
    ///
    /// An empty `content` is accepted and must not produce a corrupt entry.
    async fn set(
        &self,
        ctx: &CallContext,
        key: &str,
        content: Bytes,
        duration: Duration,
    ) -> Result<()>;
}

#[async_trait]
impl<T: Cache + ?Sized> Cache for Arc<T> {
    async fn get(
        &self,
        ctx: &CallContext,
        key: &str,
        ttl_hint: Duration,
    ) -> Result<Option<Bytes>> {
        (**self).get(ctx, key, ttl_hint).await
    }

    async fn set(
        &self,
        ctx: &CallContext,
        key: &str,
        content: Bytes,
        duration: Duration,
    ) -> Result<()> {
        (**self).set(ctx, key, content, duration).await
    }
}

// =============================================================================
// Metrics Port
// =============================================================================

/// Counter sink injected into the cache tiers.
pub trait MetricsSink: Send + Sync {
    /// Increment the named counter by one.
    fn increment(&self, counter: &str);
}

impl<T: MetricsSink + ?Sized> MetricsSink for Arc<T> {
    fn increment(&self, counter: &str) {
        (**self).increment(counter)
    }
}

// =============================================================================
// Clock Port
// =============================================================================

/// Wall-clock source. Expiration and partition windows are computed from it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic expiration tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Create a clock frozen at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, by);
    }

    /// Move the clock backward.
    pub fn rewind(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = sub_duration(*now, by);
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

// =============================================================================
// Time Helpers
// =============================================================================

/// `at + by`, saturating at the representable maximum.
pub fn add_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - by`, saturating at the representable minimum.
pub fn sub_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| at.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Time left until `deadline`, or `None` if it has passed.
pub fn remaining_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (deadline - now).to_std().ok().filter(|d| !d.is_zero())
}
