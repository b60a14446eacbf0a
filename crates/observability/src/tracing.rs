//! Tracing/logging initialization.
//!
//! JSON lines by default (one event per line, timestamped), filtered through
//! `RUST_LOG`. A compact human-readable format is available for local runs.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Output format of log events.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives, e.g. `info,forgepress_infra=debug`.
    pub filter: String,
    pub format: LogFormat,
    pub with_target: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Json,
            with_target: false,
        }
    }
}

impl ObservabilityConfig {
    /// Defaults overridden by `RUST_LOG` and `FORGEPRESS_LOG_FORMAT` (`json` | `compact`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("RUST_LOG") {
            config.filter = filter;
        }
        if let Ok(format) = std::env::var("FORGEPRESS_LOG_FORMAT") {
            config.format = match format.trim().to_ascii_lowercase().as_str() {
                "compact" | "pretty" | "text" => LogFormat::Compact,
                _ => LogFormat::Json,
            };
        }
        config
    }
}

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Initialize tracing/logging for the process from the environment.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let config = ObservabilityConfig::from_env();
    if init_with(&config).is_err() {
        // Bad directives: fall back to the default filter.
        let _ = init_with(&ObservabilityConfig {
            filter: ObservabilityConfig::default().filter,
            ..config
        });
    }
}

/// Install a global subscriber built from `config`.
pub fn init_with(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| ObservabilityError::InvalidFilter {
        filter: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(config.with_target)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(config.with_target)
            .try_init(),
    };
    installed.map_err(|_| ObservabilityError::AlreadyInitialized)?;

    ::tracing::debug!(format = ?config.format, filter = %config.filter, "logging initialized");
    Ok(())
}

/// Compact logs captured by the test harness. Repeated calls are no-ops.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_test_writer()
        .try_init();
}
