//! Chunk Records
//!
//! Row-level types of the durable tier. One `Set` produces a *generation*:
//! a run of [`ChunkRecord`]s sharing `key`, `generation_id`, `modified_at`
//! and `expiration_at`, with `chunk_index` covering `[0, N)`.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::remaining_until;
use crate::error::{Error, Result};

/// One warehouse row holding a fragment of a cached payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Logical cache key (already namespaced by the integrity layer)
    pub key: String,
    /// Unique per `Set` call
    pub generation_id: String,
    /// Write time, shared by every chunk of the generation; partition column
    pub modified_at: DateTime<Utc>,
    /// `modified_at + duration`
    pub expiration_at: DateTime<Utc>,
    /// Reassembly position
    pub chunk_index: u32,
    /// Raw fragment bytes
    pub data: Bytes,
}

impl ChunkRecord {
    /// Streaming-insert de-duplication id.
    pub fn insert_id(&self) -> String {
        format!("{}-{}", self.generation_id, self.chunk_index)
    }

    /// Metadata shared by every chunk of this record's generation.
    pub fn meta(&self) -> GenerationMeta {
        GenerationMeta {
            generation_id: self.generation_id.clone(),
            modified_at: self.modified_at,
            expiration_at: self.expiration_at,
        }
    }

    /// Expired at or after `expiration_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_at <= now
    }
}

/// The three columns returned by the metadata probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMeta {
    pub generation_id: String,
    pub modified_at: DateTime<Utc>,
    pub expiration_at: DateTime<Utc>,
}

impl GenerationMeta {
    /// Remaining lifetime at `now`, `None` once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        remaining_until(self.expiration_at, now)
    }
}

/// Split `content` into slices of at most `chunk_size` bytes.
///
/// Slices share the underlying buffer. Empty input yields no chunks.
pub fn split_chunks(content: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    assert!(chunk_size > 0, "chunk size must be positive");

    let mut chunks = Vec::with_capacity(content.len().div_ceil(chunk_size));
    let mut start = 0;
    while start < content.len() {
        let end = (start + chunk_size).min(content.len());
        chunks.push(content.slice(start..end));
        start = end;
    }
    chunks
}

/// Rebuild one generation's payload from its rows.
///
/// Rows are sorted by `chunk_index` here rather than trusted to arrive in
/// order. Rows of any other key or generation are an error, as is a gap in
/// the index range. Duplicate rows with identical bytes (a retried streaming
/// insert) are collapsed.
pub fn reassemble(key: &str, generation_id: &str, mut records: Vec<ChunkRecord>) -> Result<Bytes> {
    let incomplete = |reason: String| Error::IncompleteGeneration {
        key: key.to_string(),
        generation_id: generation_id.to_string(),
        reason,
    };

    if let Some(stray) = records
        .iter()
        .find(|r| r.key != key || r.generation_id != generation_id)
    {
        return Err(incomplete(format!(
            "row from generation {} (key {}) in result set",
            stray.generation_id, stray.key
        )));
    }

    records.sort_by_key(|r| r.chunk_index);
    records.dedup_by(|next, prev| next.chunk_index == prev.chunk_index && next.data == prev.data);

    let total: usize = records.iter().map(|r| r.data.len()).sum();
    let mut out = BytesMut::with_capacity(total);

    for (expected, record) in records.iter().enumerate() {
        if record.chunk_index as usize != expected {
            return Err(incomplete(format!(
                "expected chunk {} but found chunk {}",
                expected, record.chunk_index
            )));
        }
        out.extend_from_slice(&record.data);
    }

    Ok(out.freeze())
}

// =============================================================================
// Tests
// =============================================================================
