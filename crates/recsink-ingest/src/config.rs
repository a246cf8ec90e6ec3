//! Configuration management
//!
//! Loaded once at startup from the process environment (and a `.env` file if
//! present). A missing destination table is fatal.

use std::time::Duration;

use recsink_common::{RecsinkError, Result};
use serde::{Deserialize, Serialize};

use crate::store::MAX_BATCH_ITEMS;
use crate::writer::{UnprocessedPolicy, WriterConfig};

// ============================================================================
// Defaults
// ============================================================================

/// Object references fetched and parsed at the same time.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Records per store call.
pub const DEFAULT_CHUNK_SIZE: usize = MAX_BATCH_ITEMS;

/// Extra attempts for items the store left unprocessed.
pub const DEFAULT_UNPROCESSED_RETRIES: u32 = 0;

/// Pause before resubmitting unprocessed items.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub table: String,
    pub aws: AwsConfig,
    pub ingest: IngestConfig,
}

/// Client construction overrides; all optional for a standard AWS setup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub dynamodb_endpoint: Option<String>,
    pub s3_path_style: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    pub concurrency: usize,
    pub chunk_size: usize,
    pub unprocessed_retries: u32,
    pub retry_delay_ms: u64,
    pub invocation_timeout_secs: Option<u64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            unprocessed_retries: DEFAULT_UNPROCESSED_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            invocation_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            aws: AwsConfig::default(),
            ingest: IngestConfig::default(),
        }
    }

    /// Load configuration from environment and defaults
    ///
    /// - `DYNAMODB_TABLE` (required)
    /// - `AWS_REGION`, `S3_ENDPOINT`, `DYNAMODB_ENDPOINT`, `S3_PATH_STYLE`
    /// - `INGEST_CONCURRENCY`, `INGEST_CHUNK_SIZE`, `INGEST_UNPROCESSED_RETRIES`,
    ///   `INGEST_RETRY_DELAY_MS`, `INVOCATION_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let table = std::env::var("DYNAMODB_TABLE")
            .map_err(|_| RecsinkError::config("DYNAMODB_TABLE must be set"))?;

        let config = Config {
            table,
            aws: AwsConfig {
                region: non_empty_var("AWS_REGION"),
                s3_endpoint: non_empty_var("S3_ENDPOINT"),
                dynamodb_endpoint: non_empty_var("DYNAMODB_ENDPOINT"),
                s3_path_style: parsed_var("S3_PATH_STYLE")?.unwrap_or(false),
            },
            ingest: IngestConfig {
                concurrency: parsed_var("INGEST_CONCURRENCY")?.unwrap_or(DEFAULT_CONCURRENCY),
                chunk_size: parsed_var("INGEST_CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE),
                unprocessed_retries: parsed_var("INGEST_UNPROCESSED_RETRIES")?
                    .unwrap_or(DEFAULT_UNPROCESSED_RETRIES),
                retry_delay_ms: parsed_var("INGEST_RETRY_DELAY_MS")?
                    .unwrap_or(DEFAULT_RETRY_DELAY_MS),
                invocation_timeout_secs: parsed_var("INVOCATION_TIMEOUT_SECS")?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(RecsinkError::config("DYNAMODB_TABLE cannot be empty"));
        }

        if self.ingest.concurrency == 0 {
            return Err(RecsinkError::config("INGEST_CONCURRENCY must be greater than 0"));
        }

        if !(1..=MAX_BATCH_ITEMS).contains(&self.ingest.chunk_size) {
            return Err(RecsinkError::config(format!(
                "INGEST_CHUNK_SIZE must be between 1 and {} (got {})",
                MAX_BATCH_ITEMS, self.ingest.chunk_size
            )));
        }

        if self.ingest.invocation_timeout_secs == Some(0) {
            return Err(RecsinkError::config("INVOCATION_TIMEOUT_SECS must be greater than 0"));
        }

        Ok(())
    }

    pub fn writer_config(&self) -> WriterConfig {
        let policy = match self.ingest.unprocessed_retries {
            0 => UnprocessedPolicy::Report,
            max_attempts => UnprocessedPolicy::Retry {
                max_attempts,
                delay: Duration::from_millis(self.ingest.retry_delay_ms),
            },
        };

        WriterConfig::new(self.table.clone())
            .with_chunk_size(self.ingest.chunk_size)
            .with_unprocessed_policy(policy)
    }

    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.ingest.invocation_timeout_secs.map(Duration::from_secs)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match non_empty_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RecsinkError::config(format!("{} has an invalid value: '{}'", name, raw))),
    }
}
