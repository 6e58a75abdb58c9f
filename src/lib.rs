//! Report Cache - Multi-Tier Result Cache
//!
//! Caches the results of expensive warehouse-backed report queries so that
//! dashboards and APIs answer quickly without re-running the same analysis.
//!
//! # Architecture
//!
//! Three layers are composed behind a single [`Cache`] handle:
//!
//! ```text
//! Integrity (compress + verify) → Durable (chunked warehouse rows) → Warm (TTL KV)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Cache tiers, construction, and the cache-or-generate helpers
//! - [`config`] - YAML settings and duration parsing
//! - [`domain`] - Ports (`Cache`, `Clock`, `MetricsSink`) and call context
//! - [`error`] - Error types
//! - [`telemetry`] - Logging setup

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{build_cache, get_or_generate, CacheBuilder, RequestOptions};
pub use config::CacheSettings;
pub use domain::{Cache, CallContext};
pub use error::{Error, Result};
