//! Cache Configuration
//!
//! Settings for assembling the cache stack, loaded from YAML. Durations are
//! written as strings (`"14d"`, `"1h30m"`) and parsed on access.
//!
//! # Example
//!
//! ```yaml
//! maxExpiration: 14d
//! minExpiration: 1h
//! readOnly: true
//! chunkSize: 7000000
//! logging:
//!   level: debug
//!   json: true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::compression::{DEFAULT_LZ4_LEVEL, MAX_LZ4_LEVEL};
use crate::cache::durable::{ChunkedCacheConfig, DEFAULT_CHUNK_SIZE};
use crate::cache::integrity::DEFAULT_KEY_PREFIX;
use crate::error::{Error, Result};

/// Cache stack settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    /// Longest lifetime the durable probe looks back for.
    /// Bounds the warehouse partition scan; entries older than this are not found.
    #[serde(default = "default_max_expiration")]
    pub max_expiration: String,

    /// Requests with a shorter duration only use the warm tier.
    #[serde(default = "default_min_expiration")]
    pub min_expiration: String,

    /// Never write to the durable tier (reader side of a split deployment).
    #[serde(default)]
    pub read_only: bool,

    /// Always read the durable tier at or above `minExpiration` (cache warmer).
    #[serde(default)]
    pub force_persistent_lookup: bool,

    /// Maximum bytes per warehouse row.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Skew allowed between a generation's probe and its chunk fetch.
    #[serde(default = "default_partition_tolerance")]
    pub partition_tolerance: String,

    /// Namespace prefix applied by the integrity layer.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// LZ4 high-compression level used by the integrity layer (0..=12).
    /// Durable payloads are always compressed; only the level is tunable.
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_max_expiration() -> String {
    "14d".to_string()
}

fn default_min_expiration() -> String {
    "1h".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_partition_tolerance() -> String {
    "5s".to_string()
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_compression_level() -> i32 {
    DEFAULT_LZ4_LEVEL
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_expiration: default_max_expiration(),
            min_expiration: default_min_expiration(),
            read_only: false,
            force_persistent_lookup: false,
            chunk_size: default_chunk_size(),
            partition_tolerance: default_partition_tolerance(),
            key_prefix: default_key_prefix(),
            compression_level: default_compression_level(),
            logging: LoggingSettings::default(),
        }
    }
}

impl CacheSettings {
    /// Parse settings from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid cache settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and parse a YAML settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&yaml)
    }

    pub fn max_expiration(&self) -> Result<Duration> {
        parse_duration(&self.max_expiration)
    }

    pub fn min_expiration(&self) -> Result<Duration> {
        parse_duration(&self.min_expiration)
    }

    pub fn partition_tolerance(&self) -> Result<Duration> {
        parse_duration(&self.partition_tolerance)
    }

    /// Check every field parses and the combination is usable.
    pub fn validate(&self) -> Result<()> {
        self.to_chunked_config()?.validate()?;
        if self.key_prefix.is_empty() {
            return Err(Error::Config("keyPrefix must not be empty".into()));
        }
        if !(0..=MAX_LZ4_LEVEL).contains(&self.compression_level) {
            return Err(Error::Config(format!(
                "compressionLevel {} outside [0, {}]",
                self.compression_level, MAX_LZ4_LEVEL
            )));
        }
        Ok(())
    }

    /// Durable tier settings.
    pub fn to_chunked_config(&self) -> Result<ChunkedCacheConfig> {
        Ok(ChunkedCacheConfig {
            max_expiration: self.max_expiration()?,
            min_expiration: self.min_expiration()?,
            read_only: self.read_only,
            force_persistent_lookup: self.force_persistent_lookup,
            chunk_size: self.chunk_size,
            partition_tolerance: self.partition_tolerance()?,
        })
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a Go-style duration string (e.g., "1h", "30m", "14d", "1h30m")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let overflow = || Error::DurationParse(format!("duration out of range: {}", s));
    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            num_buf.push(c);
        } else {
            let num: u64 = num_buf
                .parse()
                .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
            num_buf.clear();

            let multiplier = match c {
                'h' | 'H' => 3600,
                'm' | 'M' => 60,
                's' | 'S' => 1,
                'd' | 'D' => 86400,
                _ => {
                    return Err(Error::DurationParse(format!(
                        "unknown duration unit: {}",
                        c
                    )))
                }
            };

            total_secs = num
                .checked_mul(multiplier)
                .and_then(|n| total_secs.checked_add(n))
                .ok_or_else(overflow)?;
        }
    }

    // Handle case where string ends with a number (assume seconds)
    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_secs = total_secs.checked_add(num).ok_or_else(overflow)?;
    }

    if total_secs == 0 {
        return Err(Error::DurationParse(
            "duration must be greater than 0".to_string(),
        ));
    }

    Ok(Duration::from_secs(total_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // =========================================================================
    // parse_duration Tests
    // =========================================================================

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("14d").unwrap(), Duration::from_secs(1_209_600));
        assert_eq!(parse_duration("1H").unwrap(), Duration::from_secs(3600)); // uppercase
    }

    #[test]
    fn test_parse_duration_combined() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(
            parse_duration("2h30m15s").unwrap(),
            Duration::from_secs(9015)
        );
        assert_eq!(
            parse_duration("1d12h").unwrap(),
            Duration::from_secs(129600)
        );
    }

    #[test]
    fn test_parse_duration_raw_seconds() {
        // Number without unit is treated as seconds
        assert_eq!(parse_duration("3600").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("  5s  ").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("0h").is_err()); // zero duration
        assert!(parse_duration("1x").is_err()); // unknown unit
        assert_matches!(
            parse_duration("99999999999999999999d"),
            Err(Error::DurationParse(_))
        );
        assert_matches!(
            parse_duration("999999999999999d"),
            Err(Error::DurationParse(_))
        );
    }

    // =========================================================================
    // CacheSettings Tests
    // =========================================================================

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::default();
        let config = settings.to_chunked_config().unwrap();

        assert_eq!(config, ChunkedCacheConfig::default());
        assert_eq!(settings.key_prefix, "cc~");
        assert_eq!(settings.compression_level, DEFAULT_LZ4_LEVEL);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
maxExpiration: 7d
minExpiration: 30m
readOnly: true
chunkSize: 1000
compressionLevel: 9
logging:
  level: debug
  json: true
"#;
        let settings = CacheSettings::from_yaml_str(yaml).unwrap();
        let config = settings.to_chunked_config().unwrap();

        assert_eq!(config.max_expiration, Duration::from_secs(7 * 86400));
        assert_eq!(config.min_expiration, Duration::from_secs(1800));
        assert!(config.read_only);
        assert!(!config.force_persistent_lookup);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.partition_tolerance, Duration::from_secs(5));
        assert_eq!(settings.compression_level, 9);
        assert!(settings.logging.json);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let settings = CacheSettings::from_yaml_str("{}").unwrap();
        assert_eq!(settings, CacheSettings::default());
    }

    #[test]
    fn test_invalid_settings() {
        assert_matches!(
            CacheSettings::from_yaml_str("chunkSize: 0"),
            Err(Error::Config(_))
        );
        assert_matches!(
            CacheSettings::from_yaml_str("minExpiration: 30d"),
            Err(Error::Config(_))
        );
        assert_matches!(
            CacheSettings::from_yaml_str("maxExpiration: soon"),
            Err(Error::DurationParse(_))
        );
        assert_matches!(
            CacheSettings::from_yaml_str("keyPrefix: ''"),
            Err(Error::Config(_))
        );
        assert_matches!(
            CacheSettings::from_yaml_str("compressionLevel: 40"),
            Err(Error::Config(_))
        );
        assert_matches!(
            CacheSettings::from_yaml_str("readOnly: [1, 2]"),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_from_missing_file() {
        assert_matches!(
            CacheSettings::from_file("/nonexistent/cache.yaml"),
            Err(Error::Io(_))
        );
    }
}
