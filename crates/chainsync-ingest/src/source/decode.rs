//! Arrow record batch decoding
//!
//! Columns are cast to the type the model wants before they are read, so the
//! physical encoding in the file does not matter: INT96 and nanosecond
//! timestamps, int32 vs int64, and dictionary or large strings all decode the
//! same way. A missing optional column reads as all-null; a missing or null
//! required column is a decode error.

use crate::error::{IngestError, Result};
use crate::models::{BtcBlock, BtcTransaction, TransactionInput, TransactionOutput};
use arrow::array::{
    new_null_array, Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array,
    StringArray, StructArray, TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit, TimestampMicrosecondType};
use arrow::record_batch::RecordBatch;
use chainsync_common::PartitionDate;
use chrono::{DateTime, NaiveDateTime};
use std::ops::Range;

/// Decode a record batch into typed records
pub trait FromRecordBatch: Sized {
    /// `first_row` is the file row of the batch's first record
    fn from_record_batch(
        batch: &RecordBatch,
        first_row: u64,
        date: PartitionDate,
    ) -> Result<Vec<Self>>;
}

/// Anything that exposes named columns of equal length
trait Columns {
    fn named(&self, name: &str) -> Option<&ArrayRef>;
    fn rows(&self) -> usize;
}

impl Columns for RecordBatch {
    fn named(&self, name: &str) -> Option<&ArrayRef> {
        self.column_by_name(name)
    }

    fn rows(&self) -> usize {
        self.num_rows()
    }
}

impl Columns for StructArray {
    fn named(&self, name: &str) -> Option<&ArrayRef> {
        self.column_by_name(name)
    }

    fn rows(&self) -> usize {
        self.len()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Need {
    Required,
    Optional,
}

fn typed(columns: &impl Columns, name: &str, to: &DataType, need: Need) -> Result<ArrayRef> {
    match columns.named(name) {
        Some(array) if array.data_type() == to => Ok(array.clone()),
        // safe cast: unconvertible values become null instead of failing the batch
        Some(array) => cast(array, to).map_err(|e| IngestError::decode(name, e.to_string())),
        None if need == Need::Required => Err(IngestError::decode(name, "column is missing")),
        None => Ok(new_null_array(to, columns.rows())),
    }
}

fn mismatch(name: &str) -> IngestError {
    IngestError::decode(name, "column has unexpected type after cast")
}

fn null_at(name: &str, row: usize) -> IngestError {
    IngestError::decode(name, format!("null value in required column at batch row {row}"))
}

struct Strings {
    name: &'static str,
    array: StringArray,
}

impl Strings {
    fn read(columns: &impl Columns, name: &'static str, need: Need) -> Result<Self> {
        let array = typed(columns, name, &DataType::Utf8, need)?;
        let array = array.as_string_opt::<i32>().ok_or_else(|| mismatch(name))?.clone();
        Ok(Self { name, array })
    }

    fn get(&self, i: usize) -> Option<String> {
        self.array.is_valid(i).then(|| self.array.value(i).to_string())
    }

    fn require(&self, i: usize) -> Result<String> {
        self.get(i).ok_or_else(|| null_at(self.name, i))
    }
}

struct Ints {
    name: &'static str,
    array: Int64Array,
}

impl Ints {
    fn read(columns: &impl Columns, name: &'static str, need: Need) -> Result<Self> {
        let array = typed(columns, name, &DataType::Int64, need)?;
        let array = array
            .as_primitive_opt::<Int64Type>()
            .ok_or_else(|| mismatch(name))?
            .clone();
        Ok(Self { name, array })
    }

    fn get(&self, i: usize) -> Option<i64> {
        self.array.is_valid(i).then(|| self.array.value(i))
    }

    fn require(&self, i: usize) -> Result<i64> {
        self.get(i).ok_or_else(|| null_at(self.name, i))
    }
}

struct Floats(Float64Array);

impl Floats {
    fn read(columns: &impl Columns, name: &'static str) -> Result<Self> {
        let array = typed(columns, name, &DataType::Float64, Need::Optional)?;
        let array = array
            .as_primitive_opt::<Float64Type>()
            .ok_or_else(|| mismatch(name))?
            .clone();
        Ok(Self(array))
    }

    fn get(&self, i: usize) -> Option<f64> {
        self.0.is_valid(i).then(|| self.0.value(i))
    }
}

struct Bools(BooleanArray);

impl Bools {
    fn read(columns: &impl Columns, name: &'static str) -> Result<Self> {
        let array = typed(columns, name, &DataType::Boolean, Need::Optional)?;
        let array = array.as_boolean_opt().ok_or_else(|| mismatch(name))?.clone();
        Ok(Self(array))
    }

    fn get(&self, i: usize) -> Option<bool> {
        self.0.is_valid(i).then(|| self.0.value(i))
    }
}

struct Timestamps(TimestampMicrosecondArray);

impl Timestamps {
    fn read(columns: &impl Columns, name: &'static str) -> Result<Self> {
        let to = DataType::Timestamp(TimeUnit::Microsecond, None);
        let array = typed(columns, name, &to, Need::Optional)?;
        let array = array
            .as_primitive_opt::<TimestampMicrosecondType>()
            .ok_or_else(|| mismatch(name))?
            .clone();
        Ok(Self(array))
    }

    fn get(&self, i: usize) -> Option<NaiveDateTime> {
        if !self.0.is_valid(i) {
            return None;
        }
        DateTime::from_timestamp_micros(self.0.value(i)).map(|ts| ts.naive_utc())
    }
}

/// A list-of-struct column flattened to per-row ranges over the struct values
struct Nested {
    ranges: Vec<Range<usize>>,
    values: StructArray,
}

impl Nested {
    fn read(columns: &impl Columns, name: &'static str) -> Result<Option<Self>> {
        let Some(array) = columns.named(name) else {
            return Ok(None);
        };

        let (offsets, valid, values): (Vec<usize>, Vec<bool>, ArrayRef) = match array.data_type() {
            DataType::List(_) => {
                let list = array.as_list_opt::<i32>().ok_or_else(|| mismatch(name))?;
                (
                    list.value_offsets().iter().map(|&o| o.max(0) as usize).collect(),
                    (0..list.len()).map(|i| list.is_valid(i)).collect(),
                    list.values().clone(),
                )
            },
            DataType::LargeList(_) => {
                let list = array.as_list_opt::<i64>().ok_or_else(|| mismatch(name))?;
                (
                    list.value_offsets().iter().map(|&o| o.max(0) as usize).collect(),
                    (0..list.len()).map(|i| list.is_valid(i)).collect(),
                    list.values().clone(),
                )
            },
            other => {
                return Err(IngestError::decode(
                    name,
                    format!("expected a list of structs, found {other}"),
                ))
            },
        };

        let values = values
            .as_struct_opt()
            .ok_or_else(|| IngestError::decode(name, "list elements are not structs"))?
            .clone();

        let ranges = valid
            .iter()
            .enumerate()
            .map(|(i, &ok)| if ok { offsets[i]..offsets[i + 1] } else { 0..0 })
            .collect();

        Ok(Some(Self { ranges, values }))
    }

    fn range(&self, row: usize) -> Range<usize> {
        self.ranges.get(row).cloned().unwrap_or(0..0)
    }
}

struct InputColumns {
    spent_transaction_hash: Strings,
    spent_output_index: Ints,
    script_asm: Strings,
    script_hex: Strings,
    sequence: Ints,
    required_signatures: Ints,
    input_type: Strings,
    address: Strings,
    value: Floats,
}

impl InputColumns {
    fn read(values: &StructArray) -> Result<Self> {
        Ok(Self {
            spent_transaction_hash: Strings::read(values, "spent_transaction_hash", Need::Optional)?,
            spent_output_index: Ints::read(values, "spent_output_index", Need::Optional)?,
            script_asm: Strings::read(values, "script_asm", Need::Optional)?,
            script_hex: Strings::read(values, "script_hex", Need::Optional)?,
            sequence: Ints::read(values, "sequence", Need::Optional)?,
            required_signatures: Ints::read(values, "required_signatures", Need::Optional)?,
            input_type: Strings::read(values, "type", Need::Optional)?,
            address: Strings::read(values, "address", Need::Optional)?,
            value: Floats::read(values, "value")?,
        })
    }

    fn get(&self, j: usize) -> TransactionInput {
        TransactionInput {
            spent_transaction_hash: self.spent_transaction_hash.get(j),
            spent_output_index: self.spent_output_index.get(j),
            script_asm: self.script_asm.get(j),
            script_hex: self.script_hex.get(j),
            sequence: self.sequence.get(j),
            required_signatures: self.required_signatures.get(j),
            input_type: self.input_type.get(j),
            address: self.address.get(j),
            value: self.value.get(j),
        }
    }
}

struct OutputColumns {
    script_asm: Strings,
    script_hex: Strings,
    required_signatures: Ints,
    output_type: Strings,
    address: Strings,
    value: Floats,
}

impl OutputColumns {
    fn read(values: &StructArray) -> Result<Self> {
        Ok(Self {
            script_asm: Strings::read(values, "script_asm", Need::Optional)?,
            script_hex: Strings::read(values, "script_hex", Need::Optional)?,
            required_signatures: Ints::read(values, "required_signatures", Need::Optional)?,
            output_type: Strings::read(values, "type", Need::Optional)?,
            address: Strings::read(values, "address", Need::Optional)?,
            value: Floats::read(values, "value")?,
        })
    }

    fn get(&self, j: usize) -> TransactionOutput {
        TransactionOutput {
            script_asm: self.script_asm.get(j),
            script_hex: self.script_hex.get(j),
            required_signatures: self.required_signatures.get(j),
            output_type: self.output_type.get(j),
            address: self.address.get(j),
            value: self.value.get(j),
        }
    }
}

impl FromRecordBatch for BtcBlock {
    fn from_record_batch(
        batch: &RecordBatch,
        first_row: u64,
        date: PartitionDate,
    ) -> Result<Vec<Self>> {
        let hash = Strings::read(batch, "hash", Need::Required)?;
        let size = Ints::read(batch, "size", Need::Optional)?;
        let stripped_size = Ints::read(batch, "stripped_size", Need::Optional)?;
        let weight = Ints::read(batch, "weight", Need::Optional)?;
        let number = Ints::read(batch, "number", Need::Required)?;
        let version = Ints::read(batch, "version", Need::Optional)?;
        let merkle_root = Strings::read(batch, "merkle_root", Need::Optional)?;
        let timestamp = Timestamps::read(batch, "timestamp")?;
        let nonce = Ints::read(batch, "nonce", Need::Optional)?;
        let bits = Strings::read(batch, "bits", Need::Optional)?;
        let coinbase_param = Strings::read(batch, "coinbase_param", Need::Optional)?;
        let transaction_count = Ints::read(batch, "transaction_count", Need::Optional)?;
        let mediantime = Timestamps::read(batch, "mediantime")?;
        let difficulty = Floats::read(batch, "difficulty")?;
        let chainwork = Strings::read(batch, "chainwork", Need::Optional)?;
        let previousblockhash = Strings::read(batch, "previousblockhash", Need::Optional)?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(BtcBlock {
                    source_row: first_row + i as u64,
                    record_date: date,
                    hash: hash.require(i)?,
                    size: size.get(i),
                    stripped_size: stripped_size.get(i),
                    weight: weight.get(i),
                    number: number.require(i)?,
                    version: version.get(i),
                    merkle_root: merkle_root.get(i),
                    timestamp: timestamp.get(i),
                    nonce: nonce.get(i),
                    bits: bits.get(i),
                    coinbase_param: coinbase_param.get(i),
                    transaction_count: transaction_count.get(i),
                    mediantime: mediantime.get(i),
                    difficulty: difficulty.get(i),
                    chainwork: chainwork.get(i),
                    previousblockhash: previousblockhash.get(i),
                })
            })
            .collect()
    }
}

impl FromRecordBatch for BtcTransaction {
    fn from_record_batch(
        batch: &RecordBatch,
        first_row: u64,
        date: PartitionDate,
    ) -> Result<Vec<Self>> {
        let hash = Strings::read(batch, "hash", Need::Required)?;
        let size = Ints::read(batch, "size", Need::Optional)?;
        let virtual_size = Ints::read(batch, "virtual_size", Need::Optional)?;
        let version = Ints::read(batch, "version", Need::Optional)?;
        let lock_time = Ints::read(batch, "lock_time", Need::Optional)?;
        let block_hash = Strings::read(batch, "block_hash", Need::Required)?;
        let block_number = Ints::read(batch, "block_number", Need::Required)?;
        let block_timestamp = Timestamps::read(batch, "block_timestamp")?;
        let index = Ints::read(batch, "index", Need::Required)?;
        let input_count = Ints::read(batch, "input_count", Need::Optional)?;
        let output_count = Ints::read(batch, "output_count", Need::Optional)?;
        let input_value = Floats::read(batch, "input_value")?;
        let output_value = Floats::read(batch, "output_value")?;
        let is_coinbase = Bools::read(batch, "is_coinbase")?;
        let fee = Floats::read(batch, "fee")?;

        let inputs = Nested::read(batch, "inputs")?;
        let input_columns = inputs
            .as_ref()
            .map(|nested| InputColumns::read(&nested.values))
            .transpose()?;
        let outputs = Nested::read(batch, "outputs")?;
        let output_columns = outputs
            .as_ref()
            .map(|nested| OutputColumns::read(&nested.values))
            .transpose()?;

        (0..batch.num_rows())
            .map(|i| {
                let tx_inputs = match (&inputs, &input_columns) {
                    (Some(nested), Some(columns)) => {
                        nested.range(i).map(|j| columns.get(j)).collect()
                    },
                    _ => Vec::new(),
                };
                let tx_outputs = match (&outputs, &output_columns) {
                    (Some(nested), Some(columns)) => {
                        nested.range(i).map(|j| columns.get(j)).collect()
                    },
                    _ => Vec::new(),
                };

                Ok(BtcTransaction {
                    source_row: first_row + i as u64,
                    record_date: date,
                    hash: hash.require(i)?,
                    size: size.get(i),
                    virtual_size: virtual_size.get(i),
                    version: version.get(i),
                    lock_time: lock_time.get(i),
                    block_hash: block_hash.require(i)?,
                    block_number: block_number.require(i)?,
                    block_timestamp: block_timestamp.get(i),
                    index: index.require(i)?,
                    input_count: input_count.get(i),
                    output_count: output_count.get(i),
                    input_value: input_value.get(i),
                    output_value: output_value.get(i),
                    is_coinbase: is_coinbase.get(i),
                    fee: fee.get(i),
                    inputs: tx_inputs,
                    outputs: tx_outputs,
                })
            })
            .collect()
    }
}
