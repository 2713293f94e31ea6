//! Error types for ingestion

use chainsync_common::PartitionError;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Main error type for ingestion
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Decode error in column '{column}': {message}")]
    Decode { column: String, message: String },

    #[error("Cannot seek to row {row}: {reason}")]
    Seek { row: u64, reason: String },

    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    OperationFailed {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<IngestError>,
    },

    #[error("Ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// True for failures that will not go away by repeating the same call:
    /// malformed statements, constraint and data errors, bad configuration.
    /// Connection, pool, I/O and unknown failures are treated as transient.
    pub fn is_permanent(&self) -> bool {
        match self {
            IngestError::Database(err) => is_permanent_sqlx(err),
            IngestError::Config(_) | IngestError::Decode { .. } | IngestError::Seek { .. } => true,
            IngestError::Cancelled => true,
            IngestError::OperationFailed { source, .. } => source.is_permanent(),
            _ => false,
        }
    }
}

fn is_permanent_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| {
                // SQLSTATE classes: 22 data exception, 23 integrity violation,
                // 42 syntax error or access rule violation
                matches!(code.get(..2), Some("22") | Some("23") | Some("42"))
            })
            .unwrap_or(false),
        sqlx::Error::Configuration(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Encode(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnDecode { .. } => true,
        _ => false,
    }
}
