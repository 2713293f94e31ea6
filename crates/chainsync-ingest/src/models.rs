//! Record types decoded from the block and transaction files
//!
//! Every record remembers the row it was read from (`source_row`, 0-based
//! within its file) and the partition it belongs to. The partition comes from
//! the file's directory, never from a column.

use chainsync_common::PartitionDate;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Anything that can report the file row it originated from
pub trait SourceRow {
    fn source_row(&self) -> u64;
}

/// A Bitcoin block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BtcBlock {
    #[serde(skip)]
    pub source_row: u64,
    pub record_date: PartitionDate,
    pub hash: String,
    pub size: Option<i64>,
    pub stripped_size: Option<i64>,
    pub weight: Option<i64>,
    pub number: i64,
    pub version: Option<i64>,
    pub merkle_root: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
    pub nonce: Option<i64>,
    pub bits: Option<String>,
    pub coinbase_param: Option<String>,
    pub transaction_count: Option<i64>,
    pub mediantime: Option<NaiveDateTime>,
    pub difficulty: Option<f64>,
    pub chainwork: Option<String>,
    pub previousblockhash: Option<String>,
}

/// A Bitcoin transaction with its nested inputs and outputs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BtcTransaction {
    #[serde(skip)]
    pub source_row: u64,
    pub record_date: PartitionDate,
    pub hash: String,
    pub size: Option<i64>,
    pub virtual_size: Option<i64>,
    pub version: Option<i64>,
    pub lock_time: Option<i64>,
    pub block_hash: String,
    pub block_number: i64,
    pub block_timestamp: Option<NaiveDateTime>,
    pub index: i64,
    pub input_count: Option<i64>,
    pub output_count: Option<i64>,
    pub input_value: Option<f64>,
    pub output_value: Option<f64>,
    pub is_coinbase: Option<bool>,
    pub fee: Option<f64>,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
}

/// One element of a transaction's `inputs` list
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionInput {
    pub spent_transaction_hash: Option<String>,
    pub spent_output_index: Option<i64>,
    pub script_asm: Option<String>,
    pub script_hex: Option<String>,
    pub sequence: Option<i64>,
    pub required_signatures: Option<i64>,
    #[serde(rename = "type")]
    pub input_type: Option<String>,
    pub address: Option<String>,
    pub value: Option<f64>,
}

/// One element of a transaction's `outputs` list
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionOutput {
    pub script_asm: Option<String>,
    pub script_hex: Option<String>,
    pub required_signatures: Option<i64>,
    #[serde(rename = "type")]
    pub output_type: Option<String>,
    pub address: Option<String>,
    pub value: Option<f64>,
}

/// An input re-homed out of its transaction, keyed by (transaction hash, index)
#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    pub source_row: u64,
    pub record_date: PartitionDate,
    pub transaction_hash: String,
    pub input_index: i64,
    pub input: TransactionInput,
}

/// An output re-homed out of its transaction, keyed by (transaction hash, index)
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub source_row: u64,
    pub record_date: PartitionDate,
    pub transaction_hash: String,
    pub output_index: i64,
    pub output: TransactionOutput,
}

impl BtcTransaction {
    /// Move the nested inputs and outputs out of the transaction, stamping
    /// each with the parent's partition, hash, row and its 0-based position.
    pub fn take_children(&mut self) -> (Vec<InputRow>, Vec<OutputRow>) {
        let inputs = std::mem::take(&mut self.inputs)
            .into_iter()
            .enumerate()
            .map(|(i, input)| InputRow {
                source_row: self.source_row,
                record_date: self.record_date,
                transaction_hash: self.hash.clone(),
                input_index: i as i64,
                input,
            })
            .collect();

        let outputs = std::mem::take(&mut self.outputs)
            .into_iter()
            .enumerate()
            .map(|(i, output)| OutputRow {
                source_row: self.source_row,
                record_date: self.record_date,
                transaction_hash: self.hash.clone(),
                output_index: i as i64,
                output,
            })
            .collect();

        (inputs, outputs)
    }
}

impl SourceRow for BtcBlock {
    fn source_row(&self) -> u64 {
        self.source_row
    }
}

impl SourceRow for BtcTransaction {
    fn source_row(&self) -> u64 {
        self.source_row
    }
}

impl SourceRow for InputRow {
    fn source_row(&self) -> u64 {
        self.source_row
    }
}

impl SourceRow for OutputRow {
    fn source_row(&self) -> u64 {
        self.source_row
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::transaction;

    #[test]
    fn test_take_children_preserves_order_and_identity() {
        let mut tx = transaction(7, "aa", 3, 2);
        let (inputs, outputs) = tx.take_children();

        assert!(tx.inputs.is_empty());
        assert!(tx.outputs.is_empty());

        let indexes: Vec<i64> = inputs.iter().map(|i| i.input_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(inputs.iter().all(|i| i.transaction_hash == "aa" && i.source_row == 7));
        assert_eq!(inputs[2].input.spent_output_index, Some(2));

        let indexes: Vec<i64> = outputs.iter().map(|o| o.output_index).collect();
        assert_eq!(indexes, vec![0, 1]);
        assert!(outputs.iter().all(|o| o.record_date == tx.record_date));
    }

    #[test]
    fn test_take_children_of_childless_transaction() {
        let mut tx = transaction(0, "bb", 0, 0);
        let (inputs, outputs) = tx.take_children();
        assert!(inputs.is_empty());
        assert!(outputs.is_empty());
    }
}
