//! Error types for the report cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the report cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Transient I/O Errors
    // =========================================================================
    /// Warehouse query or insert failed
    #[error("Warehouse error: {0}")]
    Warehouse(String),

    /// Warm tier call failed
    #[error("Warm tier error: {0}")]
    WarmTier(String),

    /// The call context was cancelled
    #[error("Cache call cancelled")]
    Cancelled,

    /// The call context deadline passed
    #[error("Cache call deadline exceeded")]
    DeadlineExceeded,

    /// A chunked write failed after some chunks were inserted
    #[error(
        "Partial write for key {key} (generation {generation_id}): \
         {written} of {total} chunks inserted: {reason}"
    )]
    PartialWrite {
        key: String,
        generation_id: String,
        written: usize,
        total: usize,
        reason: String,
    },

    // =========================================================================
    // Corruption Errors
    // =========================================================================
    /// Payload too short to contain a digest
    #[error("Corrupt payload: {len} bytes is shorter than the {min} byte digest")]
    UnderflowCorruption { len: usize, min: usize },

    /// Stored digest does not match the decompressed payload
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Chunk rows do not form one contiguous generation
    #[error("Incomplete generation {generation_id} for key {key}: {reason}")]
    IncompleteGeneration {
        key: String,
        generation_id: String,
        reason: String,
    },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// JSON encoding or decoding of a cached value failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that mean the stored bytes cannot be trusted.
    ///
    /// These must be surfaced distinctly from I/O noise so a systemic
    /// encoding bug is visible to operators.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::UnderflowCorruption { .. }
                | Error::ChecksumMismatch { .. }
                | Error::DecompressionFailed { .. }
                | Error::IncompleteGeneration { .. }
        )
    }

    /// True for network-class failures that callers treat as a miss.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Warehouse(_)
                | Error::WarmTier(_)
                | Error::Cancelled
                | Error::DeadlineExceeded
                | Error::PartialWrite { .. }
        )
    }
}
