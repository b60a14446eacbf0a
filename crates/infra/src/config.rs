//! Configuration loading and representation.
//!
//! Every setting has a default; environment variables only override. Values
//! that are present but malformed are an error, never silently ignored.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use forgepress_content::ContentPaths;

use crate::batch::{DELETE_BATCH_SIZE, MOVE_BATCH_SIZE};
use crate::retry::RetryPolicy;

/// Default cap on entries returned by one listing call.
pub const DEFAULT_LIST_LIMIT: usize = 10_000;

/// Settings of the storage gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Retry policy applied to each upload.
    pub upload_retry: RetryPolicy,
    /// Uploads replace existing objects, so a retried upload is idempotent.
    pub upload_overwrite: bool,
    /// Concurrent moves per window.
    pub move_batch_size: usize,
    /// Paths per remove call, at most [`DELETE_BATCH_SIZE`].
    pub delete_chunk_size: usize,
    /// Entries one listing may return; larger listings are refused.
    pub list_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_retry: RetryPolicy::default(),
            upload_overwrite: true,
            move_batch_size: MOVE_BATCH_SIZE,
            delete_chunk_size: DELETE_BATCH_SIZE,
            list_limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl StorageConfig {
    pub fn with_upload_retry(mut self, policy: RetryPolicy) -> Self {
        self.upload_retry = policy;
        self
    }

    pub fn with_move_batch_size(mut self, size: usize) -> Self {
        self.move_batch_size = size.max(1);
        self
    }

    /// Chunk size is clamped to `1..=DELETE_BATCH_SIZE`.
    pub fn with_delete_chunk_size(mut self, size: usize) -> Self {
        self.delete_chunk_size = size.clamp(1, DELETE_BATCH_SIZE);
        self
    }

    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit.max(1);
        self
    }

    /// Load from `FORGEPRESS_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(attempts) = parse_var::<u32, _>(&lookup, "FORGEPRESS_UPLOAD_MAX_ATTEMPTS")? {
            config.upload_retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FORGEPRESS_UPLOAD_INITIAL_DELAY_MS")? {
            config.upload_retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FORGEPRESS_UPLOAD_MAX_DELAY_MS")? {
            config.upload_retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, "FORGEPRESS_MOVE_BATCH_SIZE")? {
            config = config.with_move_batch_size(size);
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, "FORGEPRESS_DELETE_CHUNK_SIZE")? {
            config = config.with_delete_chunk_size(size);
        }
        if let Some(limit) = parse_var::<usize, _>(&lookup, "FORGEPRESS_LIST_LIMIT")? {
            config = config.with_list_limit(limit);
        }

        config
            .upload_retry
            .validate()
            .context("invalid upload retry policy")?;
        Ok(config)
    }
}

/// Settings of the content service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentServiceConfig {
    /// Top-level folder of every item's files.
    pub bucket_root: String,
}

impl Default for ContentServiceConfig {
    fn default() -> Self {
        Self {
            bucket_root: forgepress_content::DEFAULT_ROOT.to_string(),
        }
    }
}

impl ContentServiceConfig {
    pub fn paths(&self) -> ContentPaths {
        ContentPaths::new(self.bucket_root.clone())
    }
}

/// Connection settings of the Postgres record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Read `DATABASE_URL` (required) and `FORGEPRESS_DB_MAX_CONNECTIONS` (default 5).
    pub fn from_env() -> Result<Self> {
        let lookup = |name: &str| std::env::var(name).ok();
        let url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let max_connections =
            parse_var::<u32, _>(&lookup, "FORGEPRESS_DB_MAX_CONNECTIONS")?.unwrap_or(5);
        Ok(Self {
            url,
            max_connections,
        })
    }

    pub async fn connect(&self) -> Result<sqlx::PgPool> {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await
            .context("failed to connect to Postgres")
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} has invalid value '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_match_remote_limits() {
        let config = StorageConfig::default();
        assert_eq!(config.move_batch_size, 10);
        assert_eq!(config.delete_chunk_size, 1000);
        assert_eq!(config.list_limit, 10_000);
        assert_eq!(config.upload_retry, RetryPolicy::default());
    }

    #[test]
    fn env_overrides_defaults() {
        let config = StorageConfig::from_lookup(lookup(&[
            ("FORGEPRESS_UPLOAD_MAX_ATTEMPTS", "5"),
            ("FORGEPRESS_UPLOAD_INITIAL_DELAY_MS", "250"),
            ("FORGEPRESS_UPLOAD_MAX_DELAY_MS", "4000"),
            ("FORGEPRESS_MOVE_BATCH_SIZE", "4"),
            ("FORGEPRESS_DELETE_CHUNK_SIZE", "5000"),
        ]))
        .unwrap();

        assert_eq!(config.upload_retry.max_attempts, 5);
        assert_eq!(config.upload_retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.upload_retry.max_delay, Duration::from_millis(4000));
        assert_eq!(config.move_batch_size, 4);
        assert_eq!(config.delete_chunk_size, DELETE_BATCH_SIZE);
    }

    #[test]
    fn malformed_value_names_the_variable() {
        let err = StorageConfig::from_lookup(lookup(&[("FORGEPRESS_LIST_LIMIT", "lots")])).unwrap_err();
        assert!(format!("{err:#}").contains("FORGEPRESS_LIST_LIMIT"));
    }

    #[test]
    fn inconsistent_retry_settings_are_rejected() {
        let err = StorageConfig::from_lookup(lookup(&[
            ("FORGEPRESS_UPLOAD_INITIAL_DELAY_MS", "5000"),
            ("FORGEPRESS_UPLOAD_MAX_DELAY_MS", "100"),
        ]))
        .unwrap_err();
        assert!(format!("{err:#}").contains("retry policy"));
    }

    #[test]
    fn service_config_derives_paths() {
        let config = ContentServiceConfig {
            bucket_root: "archive/".to_string(),
        };
        assert_eq!(config.paths().root(), "archive");
    }
}
