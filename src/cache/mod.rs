//! Layered Report Cache
//!
//! Caches expensive report results across a warm TTL tier and a durable,
//! warehouse-backed tier, behind a compressing, self-verifying envelope.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                     get_or_generate / cache_set                           │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  IntegrityCache      key prefix, LZ4, xxh3-128 digest                     │
//! │         │                                                                 │
//! │  ChunkedCache        min/max expiration, read-only, forced lookup         │
//! │    ┌────┴──────────────────────────┐                                      │
//! │    ▼                               ▼                                      │
//! │  Warm tier (TTL KV)            Warehouse (append-only chunk rows)         │
//! │  ┌────────────────┐            ┌──────────────────────────────────┐      │
//! │  │ last write wins│            │ key │ generation │ chunk │ data  │      │
//! │  └────────────────┘            └──────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - No locks and no in-place updates: each write is a new generation
//! - Every durable payload passes through the integrity layer
//! - Tier failures degrade to a miss; corruption is reported distinctly

pub mod builder;
pub mod compression;
pub mod durable;
pub mod integrity;
pub mod metrics;
pub mod record;
pub mod request;
pub mod warehouse;
pub mod warm;

pub use builder::{build_cache, CacheBuilder};
pub use compression::{CompressionAlgorithm, Compressor, Lz4Compressor, NoopCompressor};
pub use durable::{ChunkedCache, ChunkedCacheConfig};
pub use integrity::IntegrityCache;
pub use metrics::{CacheMetrics, NoopMetrics, PrometheusMetricsSink};
pub use record::{ChunkRecord, GenerationMeta};
pub use request::{
    cache_set, get_or_generate, get_or_generate_with_clock, prefixed_cache_key,
    rounded_cache_duration, RequestOptions,
};
pub use warehouse::{ChunkQuery, InMemoryWarehouse, Warehouse};
pub use warm::{InMemoryWarmCache, KeyValueStore, KeyValueWarmTier};
