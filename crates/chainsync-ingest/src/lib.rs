//! Chainsync Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resumable, batched loading of daily BTC block and transaction Parquet
//! partitions into Postgres.
//!
//! # Components
//!
//! - **Retry**: bounded linear backoff around every store operation
//! - **Progress**: per-file resumption state stored next to each file
//! - **Batching**: per-table buffers that emit exactly-sized batches
//! - **Loader**: reads, batches and writes one file, reporting a committed cursor
//! - **Driver**: walks partition directories, skipping or resuming each file
//!
//! # Example
//!
//! ```no_run
//! use chainsync_ingest::{connect_pool, IngestConfig, IngestionDriver, PgBatchWriter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load(None)?;
//!     let writer = PgBatchWriter::new(connect_pool(&config.database).await?);
//!     let driver = IngestionDriver::new(&writer, &config);
//!     driver.ingest_date("2024-01-01".parse()?).await?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod download;
pub mod driver;
pub mod error;
pub mod layout;
pub mod loader;
pub mod models;
pub mod progress;
pub mod retry;
pub mod source;
pub mod store;
pub mod tables;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::TransactionBatchSizes;
pub use config::IngestConfig;
pub use download::{PartitionFetcher, S3Fetcher};
pub use driver::{FailurePolicy, IngestionDriver, RunSummary};
pub use error::{IngestError, Result};
pub use layout::DataKind;
pub use loader::{LoadSummary, RecordLoader};
pub use progress::{ProgressStore, ResumptionState};
pub use retry::RetryPolicy;
pub use source::{ParquetSource, RecordSource};
pub use store::{connect_pool, BatchWriter, PgBatchWriter};
