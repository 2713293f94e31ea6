//! Chainsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the chainsync workspace.
//!
//! - **Logging**: tracing subscriber bootstrap shared by every binary
//! - **Partitions**: the date key that groups source files and their progress state
//!
//! # Example
//!
//! ```no_run
//! use chainsync_common::logging::{init_logging, LogConfig};
//! use chainsync_common::PartitionDate;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let date: PartitionDate = "2024-01-01".parse()?;
//!     tracing::info!(%date, "Partition selected");
//!     Ok(())
//! }
//! ```

pub mod logging;
pub mod partition;

pub use partition::{PartitionDate, PartitionError};
