//! Batch assembly
//!
//! Records flow in chunk by chunk and leave in batches of exactly the
//! configured size. Transactions feed three independent buffers: the
//! transactions themselves plus their inputs and outputs, each with its own
//! batch size. Whatever is left once the source is exhausted is handed out as
//! a remainder of arbitrary size.

use crate::models::{BtcBlock, BtcTransaction, InputRow, OutputRow, SourceRow};
use std::collections::VecDeque;

/// FIFO buffer that releases items in batches of exactly `capacity`
#[derive(Debug, Clone)]
pub struct BatchBuffer<T> {
    capacity: usize,
    pending: VecDeque<T>,
}

impl<T> BatchBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn push(&mut self, item: T) {
        self.pending.push_back(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        self.pending.extend(items);
    }

    /// Remove exactly `capacity` items from the front, if that many are pending
    pub fn take_full(&mut self) -> Option<Vec<T>> {
        if self.pending.len() < self.capacity {
            return None;
        }
        Some(self.pending.drain(..self.capacity).collect())
    }

    /// Remove everything still pending
    pub fn take_remainder(&mut self) -> Vec<T> {
        self.pending.drain(..).collect()
    }
}

impl<T: SourceRow> BatchBuffer<T> {
    /// Source row of the oldest item not yet handed out
    pub fn oldest_row(&self) -> Option<u64> {
        self.pending.front().map(SourceRow::source_row)
    }
}

/// Batch sizes for the transaction file layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionBatchSizes {
    pub transactions: usize,
    pub inputs: usize,
    pub outputs: usize,
}

/// Single stream: blocks have no children
#[derive(Debug)]
pub struct BlockAssembler {
    pub blocks: BatchBuffer<BtcBlock>,
}

impl BlockAssembler {
    pub fn new(batch_size: usize) -> Self {
        Self {
            blocks: BatchBuffer::new(batch_size),
        }
    }

    pub fn push_chunk(&mut self, chunk: Vec<BtcBlock>) {
        self.blocks.extend(chunk);
    }

    /// Oldest source row that has been read but not yet handed out
    pub fn pending_row(&self) -> Option<u64> {
        self.blocks.oldest_row()
    }
}

/// Three streams: transactions, and their inputs and outputs re-homed
#[derive(Debug)]
pub struct TransactionAssembler {
    pub transactions: BatchBuffer<BtcTransaction>,
    pub inputs: BatchBuffer<InputRow>,
    pub outputs: BatchBuffer<OutputRow>,
}

impl TransactionAssembler {
    pub fn new(sizes: TransactionBatchSizes) -> Self {
        Self {
            transactions: BatchBuffer::new(sizes.transactions),
            inputs: BatchBuffer::new(sizes.inputs),
            outputs: BatchBuffer::new(sizes.outputs),
        }
    }

    pub fn push_chunk(&mut self, chunk: Vec<BtcTransaction>) {
        for mut tx in chunk {
            let (inputs, outputs) = tx.take_children();
            self.inputs.extend(inputs);
            self.outputs.extend(outputs);
            self.transactions.push(tx);
        }
    }

    /// Oldest source row with any part still pending
    pub fn pending_row(&self) -> Option<u64> {
        [
            self.transactions.oldest_row(),
            self.inputs.oldest_row(),
            self.outputs.oldest_row(),
        ]
        .into_iter()
        .flatten()
        .min()
    }
}
