//! Configuration management
//!
//! Values are resolved in order: built-in defaults, then an optional TOML file,
//! then environment variables (a `.env` file is honoured). Environment wins.

use crate::batch::TransactionBatchSizes;
use crate::error::{IngestError, Result};
use crate::retry::RetryPolicy;
use crate::store::{TableRow, TableSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "CHAINSYNC_CONFIG";

/// Config file picked up from the working directory when none is named
pub const DEFAULT_CONFIG_FILE: &str = "chainsync.toml";

/// Default root for downloaded partitions and their progress files
pub const DEFAULT_OUT_DIR: &str = "out";

pub const DEFAULT_BLOCK_BATCH_SIZE: usize = 20;
pub const DEFAULT_TRANSACTION_BATCH_SIZE: usize = 50;
pub const DEFAULT_INPUT_BATCH_SIZE: usize = 50;
pub const DEFAULT_OUTPUT_BATCH_SIZE: usize = 50;

/// Persist progress every this many progress reports
pub const DEFAULT_SAVE_INTERVAL: u32 = 10;

pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/chainsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// AWS Public Blockchain dataset
pub const DEFAULT_S3_REGION: &str = "us-east-2";
pub const DEFAULT_S3_BUCKET: &str = "aws-public-blockchain";
pub const DEFAULT_S3_PREFIX: &str = "v1.0/btc/";

/// Ingestion configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub storage: StorageConfig,
    pub batch: BatchConfig,
    pub sync: SyncConfig,
    pub database: DatabaseConfig,
    pub s3: S3Config,
}

/// Local file layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub out_dir: PathBuf,
    /// Log what would be downloaded without writing anything
    pub dry_run: bool,
}

/// Rows per insert statement, per table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub block: usize,
    pub transaction: usize,
    pub input: usize,
    pub output: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub save_interval: u32,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Remote dataset location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub region: String,
    pub bucket: String,
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            dry_run: false,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            block: DEFAULT_BLOCK_BATCH_SIZE,
            transaction: DEFAULT_TRANSACTION_BATCH_SIZE,
            input: DEFAULT_INPUT_BATCH_SIZE,
            output: DEFAULT_OUTPUT_BATCH_SIZE,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            save_interval: DEFAULT_SAVE_INTERVAL,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: DEFAULT_S3_REGION.to_string(),
            bucket: DEFAULT_S3_BUCKET.to_string(),
            prefix: DEFAULT_S3_PREFIX.to_string(),
        }
    }
}

impl BatchConfig {
    pub fn transaction_sizes(&self) -> TransactionBatchSizes {
        TransactionBatchSizes {
            transactions: self.transaction,
            inputs: self.input,
            outputs: self.output,
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| IngestError::Config(format!("{name}={raw}: {e}"))),
        _ => Ok(None),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(IngestError::Config(format!("{name}={raw}: expected a boolean"))),
        },
        Err(_) => Ok(None),
    }
}

fn override_with<T: FromStr>(slot: &mut T, name: &str) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_parse(name)? {
        *slot = value;
    }
    Ok(())
}

impl IngestConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match Self::config_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Explicit path, else `CHAINSYNC_CONFIG`, else `./chainsync.toml` if present
    fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        local.is_file().then_some(local)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
            .map_err(|e| IngestError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| IngestError::Config(e.to_string()))
    }

    /// Apply environment variables on top of the current values
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("CHAINSYNC_OUT_DIR") {
            if !dir.trim().is_empty() {
                self.storage.out_dir = PathBuf::from(dir);
            }
        }
        if let Some(dry_run) = env_bool("CHAINSYNC_DRY_RUN")? {
            self.storage.dry_run = dry_run;
        }

        override_with(&mut self.batch.block, "CHAINSYNC_BLOCK_BATCH_SIZE")?;
        override_with(&mut self.batch.transaction, "CHAINSYNC_TRANSACTION_BATCH_SIZE")?;
        override_with(&mut self.batch.input, "CHAINSYNC_INPUT_BATCH_SIZE")?;
        override_with(&mut self.batch.output, "CHAINSYNC_OUTPUT_BATCH_SIZE")?;

        override_with(&mut self.sync.save_interval, "CHAINSYNC_SAVE_INTERVAL")?;
        override_with(&mut self.sync.retry_max_attempts, "CHAINSYNC_RETRY_MAX_ATTEMPTS")?;
        override_with(&mut self.sync.retry_base_delay_ms, "CHAINSYNC_RETRY_BASE_DELAY_MS")?;

        override_with(&mut self.database.url, "DATABASE_URL")?;
        override_with(&mut self.database.max_connections, "DATABASE_MAX_CONNECTIONS")?;
        override_with(&mut self.database.min_connections, "DATABASE_MIN_CONNECTIONS")?;
        override_with(&mut self.database.connect_timeout_secs, "DATABASE_CONNECT_TIMEOUT")?;
        override_with(&mut self.database.idle_timeout_secs, "DATABASE_IDLE_TIMEOUT")?;

        override_with(&mut self.s3.region, "CHAINSYNC_S3_REGION")?;
        override_with(&mut self.s3.bucket, "CHAINSYNC_S3_BUCKET")?;
        override_with(&mut self.s3.prefix, "CHAINSYNC_S3_PREFIX")?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        use crate::models::{BtcBlock, BtcTransaction, InputRow, OutputRow};

        check_batch_size("block", self.batch.block, BtcBlock::TABLE)?;
        check_batch_size("transaction", self.batch.transaction, BtcTransaction::TABLE)?;
        check_batch_size("input", self.batch.input, InputRow::TABLE)?;
        check_batch_size("output", self.batch.output, OutputRow::TABLE)?;

        if self.sync.save_interval == 0 {
            return Err(IngestError::Config(
                "save_interval must be greater than 0".to_string(),
            ));
        }

        if self.sync.retry_max_attempts == 0 {
            return Err(IngestError::Config(
                "retry_max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.database.url.is_empty() {
            return Err(IngestError::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(IngestError::Config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.s3.bucket.is_empty() {
            return Err(IngestError::Config("S3 bucket cannot be empty".to_string()));
        }

        Ok(())
    }
}

fn check_batch_size(label: &str, size: usize, table: TableSpec) -> Result<()> {
    if size == 0 {
        return Err(IngestError::Config(format!(
            "{label} batch size must be greater than 0"
        )));
    }

    let limit = table.max_rows_per_statement();
    if size > limit {
        return Err(IngestError::Config(format!(
            "{label} batch size {size} exceeds {limit} rows ({} columns per row) for {}",
            table.columns.len(),
            table.name
        )));
    }
    Ok(())
}
