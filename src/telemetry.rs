//! Logging Setup
//!
//! Installs the global `tracing` subscriber for processes that host the
//! cache. `RUST_LOG` directives take precedence over the configured level.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Map a level name to a [`Level`], defaulting to INFO.
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a registry with an env filter and a pretty or JSON fmt layer.
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(parse_level(level).into())
        .from_env_lossy();

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    installed.map_err(|e| Error::Config(format!("failed to install log subscriber: {}", e)))
}

/// [`init_logging`] from loaded settings.
pub fn init_from_settings(settings: &LoggingSettings) -> Result<()> {
    init_logging(&settings.level, settings.json)
}
