//! Cache-or-Generate Helpers
//!
//! Typed front door used by report generators: derive a key from a
//! serializable request, pick a TTL aligned to a rounding boundary, and
//! either decode a cached value or compute, store, and return a fresh one.
//!
//! # Example
//!
//! ```ignore
//! let key = prefixed_cache_key("ComponentReport~", &request)?;
//! let report: Report = get_or_generate(&ctx, Some(&cache), &opts, &key, || async {
//!     build_report(&request).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::{Cache, CallContext, Clock, SystemClock};
use crate::error::{Error, Result};

/// TTL used when no rounding factor is requested (8 hours).
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(8 * 3600);

/// Per-request caching behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Skip the read and always regenerate
    pub force_refresh: bool,
    /// Never store the generated value
    pub skip_cache_writes: bool,
    /// Expire cached values at the next multiple of this duration
    pub time_rounding_factor: Option<Duration>,
}

/// TTL for a value computed at `now`.
///
/// Without a rounding factor this is [`DEFAULT_CACHE_DURATION`]. With a
/// factor `f` it is the time until the next multiple of `f` since the Unix
/// epoch, so every value computed within one window expires together.
pub fn rounded_cache_duration(opts: &RequestOptions, now: DateTime<Utc>) -> Duration {
    let factor = match opts.time_rounding_factor {
        Some(f) if !f.is_zero() => f.as_nanos() as i128,
        _ => return DEFAULT_CACHE_DURATION,
    };

    let now_nanos = now.timestamp() as i128 * 1_000_000_000 + now.timestamp_subsec_nanos() as i128;
    let into_window = now_nanos.rem_euclid(factor);
    let remaining = factor - into_window;
    Duration::from_nanos(remaining as u64)
}

/// JSON-encode `key` behind `prefix`.
///
/// A key struct with no serialized fields (`{}`) would collide with every
/// other request sharing the prefix and is rejected. Empty sequences and
/// `null` are legitimate key values.
pub fn prefixed_cache_key<K: Serialize + ?Sized>(prefix: &str, key: &K) -> Result<String> {
    let encoded = serde_json::to_string(key)?;
    if encoded == "{}" {
        return Err(Error::Config(format!(
            "cache key for prefix {:?} has no serializable fields",
            prefix
        )));
    }
    Ok(format!("{}{}", prefix, encoded))
}

/// Return the cached value for `key`, or run `generate` and cache its result.
///
/// A miss or any cache error falls back to `generate`. A cached payload that
/// does not decode as `T` is returned as an error. Generation errors are
/// returned unchanged and nothing is cached. With no cache, `generate` runs
/// directly.
pub async fn get_or_generate<C, T, E, F, Fut>(
    ctx: &CallContext,
    cache: Option<&C>,
    opts: &RequestOptions,
    key: &str,
    generate: F,
) -> std::result::Result<T, E>
where
    C: Cache + ?Sized,
    T: Serialize + DeserializeOwned,
    E: From<Error>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    get_or_generate_with_clock(ctx, &SystemClock, cache, opts, key, generate).await
}

/// [`get_or_generate`] with the TTL rounded against `clock`.
pub async fn get_or_generate_with_clock<C, T, E, F, Fut>(
    ctx: &CallContext,
    clock: &dyn Clock,
    cache: Option<&C>,
    opts: &RequestOptions,
    key: &str,
    generate: F,
) -> std::result::Result<T, E>
where
    C: Cache + ?Sized,
    T: Serialize + DeserializeOwned,
    E: From<Error>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let cache = match cache {
        Some(cache) => cache,
        None => return generate().await,
    };

    let duration = rounded_cache_duration(opts, clock.now());
    debug!(key, ?duration, "cache duration selected");

    if !opts.force_refresh {
        match cache.get(ctx, key, duration).await {
            Ok(Some(payload)) => {
                info!(key, value_type = std::any::type_name::<T>(), "cache hit");
                return serde_json::from_slice(&payload).map_err(|e| {
                    error!(key, error = %e, "failed to decode cached item");
                    E::from(Error::Serialization(e))
                });
            }
            Ok(None) => info!(key, "cache miss"),
            Err(e) => warn!(key, error = %e, "cache get failed, regenerating"),
        }
    }

    let result = generate().await?;
    if !opts.skip_cache_writes {
        cache_set(ctx, cache, key, &result, duration).await;
    }
    Ok(result)
}

/// JSON-encode `value` and store it. Failures are logged, never returned.
pub async fn cache_set<C, T>(ctx: &CallContext, cache: &C, key: &str, value: &T, duration: Duration)
where
    C: Cache + ?Sized,
    T: Serialize + ?Sized,
{
    let encoded = match serde_json::to_vec(value) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!(key, error = %e, "failed to encode cache item");
            return;
        }
    };

    match cache.set(ctx, key, Bytes::from(encoded), duration).await {
        Ok(()) => debug!(key, "cache set"),
        Err(e) => warn!(key, error = %e, "couldn't persist new item to cache"),
    }
}

// =============================================================================
// Tests
// =============================================================================
