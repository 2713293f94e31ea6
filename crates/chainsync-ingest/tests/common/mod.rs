//! Shared fakes for loader integration tests
//!
//! - [`FakeSource`]: in-memory [`RecordSource`] that records seeks
//! - [`RecordingWriter`]: the crate's own recording [`BatchWriter`] fixture,
//!   included from `src/testing/writer.rs`
//! - record builders for blocks and transactions

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chainsync_common::PartitionDate;
use chainsync_ingest::models::{BtcBlock, BtcTransaction, TransactionInput, TransactionOutput};
use chainsync_ingest::source::Chunk;
use chainsync_ingest::store::{SqlValue, TableSpec};
use chainsync_ingest::{BatchWriter, IngestError, RecordSource, Result};

#[path = "../../src/testing/writer.rs"]
mod writer;

pub use writer::{Insert, RecordingWriter};

pub fn date() -> PartitionDate {
    "2024-01-01".parse().unwrap()
}

pub fn block(row: u64) -> BtcBlock {
    BtcBlock {
        source_row: row,
        record_date: date(),
        hash: format!("block-{row}"),
        size: Some(285),
        stripped_size: None,
        weight: None,
        number: row as i64,
        version: Some(1),
        merkle_root: None,
        timestamp: None,
        nonce: None,
        bits: None,
        coinbase_param: None,
        transaction_count: Some(1),
        mediantime: None,
        difficulty: Some(1.0),
        chainwork: None,
        previousblockhash: None,
    }
}

pub fn blocks(rows: u64) -> Vec<BtcBlock> {
    (0..rows).map(block).collect()
}

pub fn transaction(row: u64, inputs: usize, outputs: usize) -> BtcTransaction {
    BtcTransaction {
        source_row: row,
        record_date: date(),
        hash: format!("tx-{row}"),
        size: None,
        virtual_size: None,
        version: Some(2),
        lock_time: Some(0),
        block_hash: format!("block-{}", row / 10),
        block_number: (row / 10) as i64,
        block_timestamp: None,
        index: (row % 10) as i64,
        input_count: Some(inputs as i64),
        output_count: Some(outputs as i64),
        input_value: None,
        output_value: None,
        is_coinbase: Some(inputs == 0),
        fee: None,
        inputs: (0..inputs)
            .map(|j| TransactionInput {
                spent_transaction_hash: Some(format!("spent-{row}-{j}")),
                spent_output_index: Some(j as i64),
                value: Some(0.5),
                ..Default::default()
            })
            .collect(),
        outputs: (0..outputs)
            .map(|_| TransactionOutput {
                address: Some(format!("addr-{row}")),
                value: Some(1.5),
                ..Default::default()
            })
            .collect(),
    }
}

pub fn transactions(rows: u64, inputs: usize, outputs: usize) -> Vec<BtcTransaction> {
    (0..rows).map(|row| transaction(row, inputs, outputs)).collect()
}

/// In-memory source over a fixed record list
pub struct FakeSource<T> {
    records: Vec<T>,
    position: usize,
    started: bool,
    fail_seek: bool,
    pub seeks: Vec<u64>,
}

impl<T> FakeSource<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records,
            position: 0,
            started: false,
            fail_seek: false,
            seeks: Vec::new(),
        }
    }

    /// Every seek fails, as on a truncated file
    pub fn with_broken_seek(mut self) -> Self {
        self.fail_seek = true;
        self
    }
}

impl<T: Clone> RecordSource for FakeSource<T> {
    type Record = T;

    fn total_rows(&self) -> u64 {
        self.records.len() as u64
    }

    fn seek_to_row(&mut self, row: u64) -> Result<()> {
        self.seeks.push(row);
        if self.fail_seek || self.started || row > self.total_rows() {
            return Err(IngestError::Seek {
                row,
                reason: "fake source refused".to_string(),
            });
        }
        self.position = row as usize;
        Ok(())
    }

    fn read_chunk(&mut self, max: usize) -> Result<Chunk<T>> {
        self.started = true;
        let end = (self.position + max).min(self.records.len());
        let records = self.records[self.position..end].to_vec();
        self.position = end;
        Ok(Chunk {
            records,
            end_of_data: self.position >= self.records.len(),
        })
    }
}
