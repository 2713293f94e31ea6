//! Parquet-backed [`RecordSource`]

use super::{Chunk, FromRecordBatch, RecordSource};
use crate::error::{IngestError, Result};
use chainsync_common::PartitionDate;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use tracing::debug;

enum ReaderState {
    /// Footer read, nothing decoded yet; the start row can still move
    Opened(ParquetRecordBatchReaderBuilder<File>),
    Reading(ParquetRecordBatchReader),
    Exhausted,
}

/// Reads typed records from one Parquet file.
///
/// The partition date is taken from the file's directory. Each record is
/// stamped with its absolute row number in the file, including after a seek.
pub struct ParquetSource<T> {
    date: PartitionDate,
    total_rows: u64,
    start_row: u64,
    /// Rows handed out, counted from the start of the file
    position: u64,
    /// Rows decoded, counted from the start of the file
    decoded: u64,
    state: ReaderState,
    pending: VecDeque<T>,
}

impl<T: FromRecordBatch> ParquetSource<T> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let date = PartitionDate::from_path(path)?;
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let total_rows = u64::try_from(builder.metadata().file_metadata().num_rows()).unwrap_or(0);

        debug!(file = %path.display(), total_rows, %date, "Opened parquet file");

        Ok(Self {
            date,
            total_rows,
            start_row: 0,
            position: 0,
            decoded: 0,
            state: ReaderState::Opened(builder),
            pending: VecDeque::new(),
        })
    }

    fn start_reading(&mut self, batch_size: usize) -> Result<()> {
        let builder = match std::mem::replace(&mut self.state, ReaderState::Exhausted) {
            ReaderState::Opened(builder) => builder,
            other => {
                self.state = other;
                return Ok(());
            },
        };

        let offset = usize::try_from(self.start_row).map_err(|_| IngestError::Seek {
            row: self.start_row,
            reason: "row offset does not fit in memory addressing".to_string(),
        })?;

        let reader = builder
            .with_batch_size(batch_size)
            .with_offset(offset)
            .build()?;

        self.position = self.start_row;
        self.decoded = self.start_row;
        self.state = ReaderState::Reading(reader);
        Ok(())
    }

    /// Decode record batches until `want` records are pending or the file ends
    fn fill(&mut self, want: usize) -> Result<()> {
        while self.pending.len() < want {
            let ReaderState::Reading(reader) = &mut self.state else {
                return Ok(());
            };

            match reader.next() {
                Some(batch) => {
                    let batch = batch?;
                    let records = T::from_record_batch(&batch, self.decoded, self.date)?;
                    self.decoded += batch.num_rows() as u64;
                    self.pending.extend(records);
                },
                None => self.state = ReaderState::Exhausted,
            }
        }
        Ok(())
    }
}

impl<T: FromRecordBatch> RecordSource for ParquetSource<T> {
    type Record = T;

    fn total_rows(&self) -> u64 {
        self.total_rows
    }

    fn seek_to_row(&mut self, row: u64) -> Result<()> {
        if !matches!(self.state, ReaderState::Opened(_)) {
            return Err(IngestError::Seek {
                row,
                reason: "reading has already started".to_string(),
            });
        }
        if row > self.total_rows {
            return Err(IngestError::Seek {
                row,
                reason: format!("file has only {} rows", self.total_rows),
            });
        }

        self.start_row = row;
        self.position = row;
        Ok(())
    }

    fn read_chunk(&mut self, max: usize) -> Result<Chunk<T>> {
        let max = max.max(1);
        self.start_reading(max)?;
        self.fill(max)?;

        let take = max.min(self.pending.len());
        let records: Vec<T> = self.pending.drain(..take).collect();
        self.position += records.len() as u64;

        let end_of_data = self.position >= self.total_rows
            || (matches!(self.state, ReaderState::Exhausted) && self.pending.is_empty());

        Ok(Chunk {
            records,
            end_of_data,
        })
    }
}
