//! Payload Compression
//!
//! Compressors used by the integrity layer. LZ4 block format with the
//! uncompressed size prepended. The built cache stack always uses LZ4; the
//! no-op compressor is only for wrapping stores that already compress at rest.
//!
//! # Example
//!
//! ```
//! use reportcache::cache::compression::{Compressor, Lz4Compressor};
//!
//! let lz4 = Lz4Compressor::new();
//! let data = b"Hello, this is test data that should compress well!";
//!
//! let compressed = lz4.compress(data).unwrap();
//! let decompressed = lz4.decompress(&compressed).unwrap();
//! assert_eq!(decompressed, data);
//! ```

use crate::error::{Error, Result};

/// Largest payload the LZ4 decompressor will allocate for (1 GiB).
///
/// The size prefix is read from untrusted bytes; a flipped bit must not turn
/// into a multi-gigabyte allocation.
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 1024 * 1024 * 1024;

/// Default LZ4 high-compression level.
pub const DEFAULT_LZ4_LEVEL: i32 = 4;

/// Highest LZ4 high-compression level.
pub const MAX_LZ4_LEVEL: i32 = 12;

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

// =============================================================================
// No-Op Compressor
// =============================================================================

/// Pass-through compressor (no compression)
#[derive(Debug, Default)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

// =============================================================================
// LZ4 Compressor
// =============================================================================

/// LZ4 compressor (fast compression)
#[derive(Debug)]
pub struct Lz4Compressor {
    level: i32,
    max_decompressed_size: usize,
}

impl Lz4Compressor {
    /// Create new LZ4 compressor with default settings
    pub fn new() -> Self {
        Self {
            level: DEFAULT_LZ4_LEVEL,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }

    /// Create with custom compression level (0 selects the library default)
    pub fn with_level(level: i32) -> Self {
        Self {
            level,
            ..Self::new()
        }
    }

    /// Cap the size prefix accepted on decompression
    pub fn with_max_decompressed_size(mut self, max: usize) -> Self {
        self.max_decompressed_size = max;
        self
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    fn failure(reason: impl ToString) -> Error {
        Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: reason.to_string(),
        }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let prefix: [u8; 4] = data
            .get(..4)
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| Self::failure("missing size prefix"))?;
        let claimed = i32::from_le_bytes(prefix);
        if claimed < 0 || claimed as usize > self.max_decompressed_size {
            return Err(Self::failure(format!(
                "size prefix {} outside [0, {}]",
                claimed, self.max_decompressed_size
            )));
        }

        let out = lz4::block::decompress(data, None).map_err(|e| Self::failure(e))?;
        if out.len() != claimed as usize {
            return Err(Self::failure(format!(
                "decoded {} bytes but size prefix claims {}",
                out.len(),
                claimed
            )));
        }
        Ok(out)
    }
}
