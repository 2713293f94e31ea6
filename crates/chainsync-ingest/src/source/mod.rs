//! Columnar record sources
//!
//! A source yields an ordered, finite sequence of typed records and knows how
//! many rows it holds up front. It can be positioned once, before the first
//! read, which is how an interrupted file is resumed.

pub mod columnar;
pub mod decode;

pub use columnar::ParquetSource;
pub use decode::FromRecordBatch;

use crate::error::Result;

/// Records returned by one read call
#[derive(Debug)]
pub struct Chunk<T> {
    pub records: Vec<T>,

    /// No further reads will return records
    pub end_of_data: bool,
}

/// Ordered, seekable, finite source of records
pub trait RecordSource {
    type Record;

    /// Total rows in the source, known before any read
    fn total_rows(&self) -> u64;

    /// Position the source so that the next read starts at `row`.
    /// Only valid before the first read.
    fn seek_to_row(&mut self, row: u64) -> Result<()>;

    /// Read up to `max` records. Reaching the end is not an error.
    fn read_chunk(&mut self, max: usize) -> Result<Chunk<Self::Record>>;
}
