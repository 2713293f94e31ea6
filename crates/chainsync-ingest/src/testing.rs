//! Record, Parquet and writer fixtures for unit tests
#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::error::Result;
use crate::models::{BtcBlock, BtcTransaction, TransactionInput, TransactionOutput};
use crate::store::{BatchWriter, SqlValue, TableSpec};
use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, ListArray, StringArray, StructArray,
    TimestampMicrosecondArray,
};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Fields, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chainsync_common::PartitionDate;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod writer;

pub use writer::{Insert, RecordingWriter};

const GENESIS_MICROS: i64 = 1_231_006_505_000_000;

pub fn date() -> PartitionDate {
    "2024-01-01".parse().unwrap()
}

pub fn block(row: u64, hash: &str) -> BtcBlock {
    BtcBlock {
        source_row: row,
        record_date: date(),
        hash: hash.to_string(),
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

pub fn transaction(row: u64, hash: &str, inputs: usize, outputs: usize) -> BtcTransaction {
    BtcTransaction {
        source_row: row,
        record_date: date(),
        hash: hash.to_string(),
        size: None,
        virtual_size: None,
        version: Some(1),
        lock_time: Some(0),
        block_hash: "block".to_string(),
        block_number: 1,
        block_timestamp: None,
        index: row as i64,
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
                ..Default::default()
            })
            .collect(),
        outputs: (0..outputs)
            .map(|_| TransactionOutput {
                value: Some(row as f64 + 0.5),
                ..Default::default()
            })
            .collect(),
    }
}

/// Blocks `first_row..first_row + rows` with a subset of the real columns
pub fn block_batch(first_row: u64, rows: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("hash", DataType::Utf8, false),
        Field::new("number", DataType::Int64, false),
        Field::new("size", DataType::Int64, true),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            true,
        ),
        Field::new("difficulty", DataType::Float64, true),
    ]));

    let numbers: Vec<i64> = (0..rows as i64).map(|i| first_row as i64 + i).collect();
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(
                numbers.iter().map(|n| format!("block-{n}")),
            )),
            Arc::new(Int64Array::from(numbers.clone())),
            Arc::new(Int64Array::from(vec![Some(285); rows])),
            Arc::new(TimestampMicrosecondArray::from_iter_values(
                numbers.iter().map(|n| GENESIS_MICROS + n * 600_000_000),
            )),
            Arc::new(Float64Array::from(vec![1.0; rows])),
        ],
    )
    .unwrap()
}

/// Transactions with `(inputs, outputs)` counts per row
pub fn transaction_batch(first_row: u64, shape: &[(usize, usize)]) -> RecordBatch {
    let rows: Vec<i64> = (0..shape.len() as i64).map(|i| first_row as i64 + i).collect();

    let input_fields = Fields::from(vec![
        Field::new("spent_transaction_hash", DataType::Utf8, true),
        Field::new("spent_output_index", DataType::Int64, true),
        Field::new("value", DataType::Float64, true),
    ]);
    let output_fields = Fields::from(vec![
        Field::new("address", DataType::Utf8, true),
        Field::new("value", DataType::Float64, true),
    ]);
    let input_item = Arc::new(Field::new("item", DataType::Struct(input_fields.clone()), true));
    let output_item = Arc::new(Field::new("item", DataType::Struct(output_fields.clone()), true));

    let mut spent_hashes = Vec::new();
    let mut spent_indexes = Vec::new();
    let mut input_values = Vec::new();
    let mut addresses = Vec::new();
    let mut output_values = Vec::new();
    for (row, &(inputs, outputs)) in rows.iter().zip(shape) {
        for j in 0..inputs {
            spent_hashes.push(format!("spent-{row}-{j}"));
            spent_indexes.push(j as i64);
            input_values.push(0.25);
        }
        for _ in 0..outputs {
            addresses.push(format!("addr-{row}"));
            output_values.push(*row as f64 + 0.5);
        }
    }

    let input_values = StructArray::new(
        input_fields,
        vec![
            Arc::new(StringArray::from(spent_hashes)) as ArrayRef,
            Arc::new(Int64Array::from(spent_indexes)),
            Arc::new(Float64Array::from(input_values)),
        ],
        None,
    );
    let output_values = StructArray::new(
        output_fields,
        vec![
            Arc::new(StringArray::from(addresses)) as ArrayRef,
            Arc::new(Float64Array::from(output_values)),
        ],
        None,
    );

    let inputs = ListArray::new(
        input_item.clone(),
        OffsetBuffer::from_lengths(shape.iter().map(|&(i, _)| i)),
        Arc::new(input_values),
        None,
    );
    let outputs = ListArray::new(
        output_item.clone(),
        OffsetBuffer::from_lengths(shape.iter().map(|&(_, o)| o)),
        Arc::new(output_values),
        None,
    );

    let schema = Arc::new(Schema::new(vec![
        Field::new("hash", DataType::Utf8, false),
        Field::new("block_hash", DataType::Utf8, false),
        Field::new("block_number", DataType::Int64, false),
        Field::new("index", DataType::Int64, false),
        Field::new("is_coinbase", DataType::Boolean, true),
        Field::new("inputs", DataType::List(input_item), true),
        Field::new("outputs", DataType::List(output_item), true),
    ]));

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| format!("tx-{r}")))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| format!("block-{}", r / 10)))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r / 10))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r % 10))),
            Arc::new(BooleanArray::from_iter(shape.iter().map(|&(i, _)| Some(i == 0)))),
            Arc::new(inputs),
            Arc::new(outputs),
        ],
    )
    .unwrap()
}

fn write_parquet(dir: &Path, batch: &RecordBatch) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("part-00000.snappy.parquet");
    let file = File::create(&path).unwrap();
    // small row groups so offsets cross group boundaries
    let props = WriterProperties::builder()
        .set_max_row_group_size(10)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props)).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
    path
}

/// `{root}/{date}/part-00000.snappy.parquet` holding `rows` blocks
pub fn write_block_file(root: &Path, date: &str, rows: usize) -> PathBuf {
    write_parquet(&root.join(date), &block_batch(0, rows))
}

/// `{root}/{date}/part-00000.snappy.parquet` holding one transaction per shape entry
pub fn write_transaction_file(root: &Path, date: &str, shape: &[(usize, usize)]) -> PathBuf {
    write_parquet(&root.join(date), &transaction_batch(0, shape))
}
