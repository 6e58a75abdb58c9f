//! Warehouse Port
//!
//! The durable tier talks to a columnar analytical warehouse through the
//! [`Warehouse`] trait: a metadata probe, a chunk fetch, and a streaming
//! single-row insert. Queries are described by [`ChunkQuery`], which a real
//! client renders with [`ChunkQuery::to_sql`] and binds with
//! [`ChunkQuery::parameters`].
//!
//! # Table layout
//!
//! ```text
//! cached_data
//! ┌──────┬───────────────┬─────────────┬───────────────┬─────────────┬──────┐
//! │ key  │ generation_id │ modified_at │ expiration_at │ chunk_index │ data │
//! │ STR  │ STR           │ TIMESTAMP ▲ │ TIMESTAMP     │ INT64       │ BYTES│
//! └──────┴───────────────┴─────────────┴───────────────┴─────────────┴──────┘
//!                               ▲ partition column
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::record::{ChunkRecord, GenerationMeta};
use crate::domain::CallContext;
use crate::error::{Error, Result};

/// Default table name for cached chunks
pub const DEFAULT_TABLE: &str = "cached_data";

/// Column names of the chunk table
pub mod columns {
    pub const KEY: &str = "key";
    pub const GENERATION_ID: &str = "generation_id";
    pub const MODIFIED_AT: &str = "modified_at";
    pub const EXPIRATION_AT: &str = "expiration_at";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const DATA: &str = "data";

    /// Partitioning column
    pub const PARTITION: &str = MODIFIED_AT;
}

// =============================================================================
// Query Description
// =============================================================================

/// Result ordering for a [`ChunkQuery`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOrder {
    /// Newest generation first (metadata probe)
    ModifiedDesc,
    /// Reassembly order (chunk fetch)
    ChunkIndexAsc,
}

/// Bound query parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    String(String),
    Timestamp(DateTime<Utc>),
}

/// Typed filter over the chunk table.
///
/// The partition range is always present so every query is pruned to a
/// bounded time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkQuery {
    pub key: String,
    pub generation_id: Option<String>,
    /// Inclusive lower bound on `modified_at`
    pub partition_start: DateTime<Utc>,
    /// Inclusive upper bound on `modified_at`
    pub partition_end: DateTime<Utc>,
    /// Only rows with `expiration_at` strictly after this instant
    pub expires_after: Option<DateTime<Utc>>,
    pub order: ChunkOrder,
    pub limit: Option<usize>,
}

impl ChunkQuery {
    /// Probe for the newest unexpired generation of `key`.
    pub fn latest_generation(
        key: impl Into<String>,
        partition_start: DateTime<Utc>,
        partition_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            generation_id: None,
            partition_start,
            partition_end,
            expires_after: Some(now),
            order: ChunkOrder::ModifiedDesc,
            limit: Some(1),
        }
    }

    /// Fetch every chunk of one generation.
    pub fn generation_chunks(
        key: impl Into<String>,
        generation_id: impl Into<String>,
        partition_start: DateTime<Utc>,
        partition_end: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            generation_id: Some(generation_id.into()),
            partition_start,
            partition_end,
            expires_after: None,
            order: ChunkOrder::ChunkIndexAsc,
            limit: None,
        }
    }

    /// Whether `record` passes every filter of this query.
    pub fn matches(&self, record: &ChunkRecord) -> bool {
        record.key == self.key
            && self
                .generation_id
                .as_ref()
                .map_or(true, |g| *g == record.generation_id)
            && record.modified_at >= self.partition_start
            && record.modified_at <= self.partition_end
            && self
                .expires_after
                .map_or(true, |t| !record.is_expired(t))
    }

    /// Render as a parameterized statement against `dataset.table`.
    ///
    /// Values are referenced as `@name` and supplied by [`Self::parameters`];
    /// nothing caller-controlled is interpolated into the text.
    pub fn to_sql(&self, dataset: &str, table: &str) -> String {
        use columns::*;

        let projection = match self.order {
            ChunkOrder::ModifiedDesc => format!("{MODIFIED_AT}, {EXPIRATION_AT}, {GENERATION_ID}"),
            ChunkOrder::ChunkIndexAsc => "*".to_string(),
        };

        let mut predicates = vec![
            format!("`{PARTITION}` >= @partition_start"),
            format!("`{PARTITION}` <= @partition_end"),
        ];
        if self.expires_after.is_some() {
            predicates.push(format!("`{EXPIRATION_AT}` > @expires_after"));
        }
        predicates.push(format!("`{KEY}` = @key"));
        if self.generation_id.is_some() {
            predicates.push(format!("`{GENERATION_ID}` = @generation_id"));
        }

        let order = match self.order {
            ChunkOrder::ModifiedDesc => format!("{MODIFIED_AT} DESC"),
            ChunkOrder::ChunkIndexAsc => format!("{CHUNK_INDEX} ASC"),
        };

        let mut sql = format!(
            "SELECT {} FROM `{}.{}` WHERE {} ORDER BY {}",
            projection,
            dataset,
            table,
            predicates.join(" AND "),
            order
        );
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    /// Named parameters referenced by [`Self::to_sql`].
    pub fn parameters(&self) -> Vec<(&'static str, QueryParam)> {
        let mut params = vec![
            ("partition_start", QueryParam::Timestamp(self.partition_start)),
            ("partition_end", QueryParam::Timestamp(self.partition_end)),
        ];
        if let Some(t) = self.expires_after {
            params.push(("expires_after", QueryParam::Timestamp(t)));
        }
        params.push(("key", QueryParam::String(self.key.clone())));
        if let Some(g) = &self.generation_id {
            params.push(("generation_id", QueryParam::String(g.clone())));
        }
        params
    }
}

// =============================================================================
// Warehouse Trait
// =============================================================================

/// Warehouse collaborator used by the durable tier
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a [`ChunkOrder::ModifiedDesc`] probe and return the first row's
    /// metadata, or `None` when no row matches.
    async fn latest_generation(
        &self,
        ctx: &CallContext,
        query: &ChunkQuery,
    ) -> Result<Option<GenerationMeta>>;

    /// Return every row matching `query`.
    async fn fetch_chunks(&self, ctx: &CallContext, query: &ChunkQuery)
        -> Result<Vec<ChunkRecord>>;

    /// Stream a single row into the table.
    async fn insert(&self, ctx: &CallContext, record: &ChunkRecord) -> Result<()>;
}

// =============================================================================
// In-Memory Warehouse
// =============================================================================

/// Warehouse double that applies query filters exactly, counts calls, and
/// can inject failures.
#[derive(Default)]
pub struct InMemoryWarehouse {
    rows: RwLock<Vec<ChunkRecord>>,
    probe_calls: AtomicU64,
    fetch_calls: AtomicU64,
    insert_calls: AtomicU64,
    /// Fail the insert with this 1-based call number
    fail_insert_at: Mutex<Option<u64>>,
    fail_reads: AtomicBool,
    /// Return fetched rows newest-inserted first
    reverse_fetch: AtomicBool,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row directly, bypassing call counting.
    pub fn push_row(&self, record: ChunkRecord) {
        self.rows.write().push(record);
    }

    /// Snapshot of every stored row in insertion order.
    pub fn rows(&self) -> Vec<ChunkRecord> {
        self.rows.read().clone()
    }

    /// Rows stored for `key`.
    pub fn rows_for(&self, key: &str) -> Vec<ChunkRecord> {
        self.rows
            .read()
            .iter()
            .filter(|r| r.key == key)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn probe_calls(&self) -> u64 {
        self.probe_calls.load(Ordering::Relaxed)
    }

    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }

    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::Relaxed)
    }

    /// Total calls of any kind.
    pub fn total_calls(&self) -> u64 {
        self.probe_calls() + self.fetch_calls() + self.insert_calls()
    }

    /// Fail the `n`th insert call (1-based) from now on.
    pub fn fail_insert_at(&self, n: u64) {
        *self.fail_insert_at.lock() = Some(self.insert_calls() + n);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Return fetch results in reverse insertion order instead of the
    /// requested ordering, to prove callers do their own sort.
    pub fn set_reverse_fetch(&self, reverse: bool) {
        self.reverse_fetch.store(reverse, Ordering::Relaxed);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::Warehouse("query job failed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn latest_generation(
        &self,
        _ctx: &CallContext,
        query: &ChunkQuery,
    ) -> Result<Option<GenerationMeta>> {
        self.probe_calls.fetch_add(1, Ordering::Relaxed);
        self.check_reads()?;

        let rows = self.rows.read();
        Ok(rows
            .iter()
            .filter(|r| query.matches(r))
            .max_by_key(|r| r.modified_at)
            .map(ChunkRecord::meta))
    }

    async fn fetch_chunks(
        &self,
        _ctx: &CallContext,
        query: &ChunkQuery,
    ) -> Result<Vec<ChunkRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        self.check_reads()?;

        let mut matched: Vec<ChunkRecord> = self
            .rows
            .read()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        if self.reverse_fetch.load(Ordering::Relaxed) {
            matched.reverse();
        } else {
            match query.order {
                ChunkOrder::ChunkIndexAsc => matched.sort_by_key(|r| r.chunk_index),
                ChunkOrder::ModifiedDesc => matched.sort_by(|a, b| b.modified_at.cmp(&a.modified_at)),
            }
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn insert(&self, _ctx: &CallContext, record: &ChunkRecord) -> Result<()> {
        let call = self.insert_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if *self.fail_insert_at.lock() == Some(call) {
            return Err(Error::Warehouse(format!(
                "streaming insert {} rejected",
                record.insert_id()
            )));
        }

        self.rows.write().push(record.clone());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
