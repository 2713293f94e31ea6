//! Row mappings for the four target tables

use crate::models::{BtcBlock, BtcTransaction, InputRow, OutputRow};
use crate::store::{SqlValue, TableRow, TableSpec};

// ============================================================================
// Table definitions
// ============================================================================

pub const BLOCKS: TableSpec = TableSpec {
    name: "btc_blocks",
    columns: &[
        "record_date",
        "hash",
        "size",
        "stripped_size",
        "weight",
        "number",
        "version",
        "merkle_root",
        "block_timestamp",
        "nonce",
        "bits",
        "coinbase_param",
        "transaction_count",
        "mediantime",
        "difficulty",
        "chainwork",
        "previousblockhash",
    ],
};

pub const TRANSACTIONS: TableSpec = TableSpec {
    name: "btc_transactions",
    columns: &[
        "record_date",
        "hash",
        "size",
        "virtual_size",
        "version",
        "lock_time",
        "block_hash",
        "block_number",
        "block_timestamp",
        "tx_index",
        "input_count",
        "output_count",
        "input_value",
        "output_value",
        "is_coinbase",
        "fee",
    ],
};

pub const INPUTS: TableSpec = TableSpec {
    name: "btc_transaction_inputs",
    columns: &[
        "record_date",
        "transaction_hash",
        "input_index",
        "spent_transaction_hash",
        "spent_output_index",
        "script_asm",
        "script_hex",
        "sequence",
        "required_signatures",
        "input_type",
        "address",
        "spent_value",
    ],
};

pub const OUTPUTS: TableSpec = TableSpec {
    name: "btc_transaction_outputs",
    columns: &[
        "record_date",
        "transaction_hash",
        "output_index",
        "script_asm",
        "script_hex",
        "required_signatures",
        "output_type",
        "address",
        "output_amount",
    ],
};

// ============================================================================
// Row flattening
// ============================================================================

impl TableRow for BtcBlock {
    const TABLE: TableSpec = BLOCKS;

    fn push_values(&self, out: &mut Vec<SqlValue>) {
        out.extend([
            SqlValue::Date(Some(self.record_date.as_naive())),
            SqlValue::Text(Some(self.hash.clone())),
            SqlValue::BigInt(self.size),
            SqlValue::BigInt(self.stripped_size),
            SqlValue::BigInt(self.weight),
            SqlValue::BigInt(Some(self.number)),
            SqlValue::BigInt(self.version),
            SqlValue::Text(self.merkle_root.clone()),
            SqlValue::Timestamp(self.timestamp),
            SqlValue::BigInt(self.nonce),
            SqlValue::Text(self.bits.clone()),
            SqlValue::Text(self.coinbase_param.clone()),
            SqlValue::BigInt(self.transaction_count),
            SqlValue::Timestamp(self.mediantime),
            SqlValue::Double(self.difficulty),
            SqlValue::Text(self.chainwork.clone()),
            SqlValue::Text(self.previousblockhash.clone()),
        ]);
    }
}

impl TableRow for BtcTransaction {
    const TABLE: TableSpec = TRANSACTIONS;

    fn push_values(&self, out: &mut Vec<SqlValue>) {
        out.extend([
            SqlValue::Date(Some(self.record_date.as_naive())),
            SqlValue::Text(Some(self.hash.clone())),
            SqlValue::BigInt(self.size),
            SqlValue::BigInt(self.virtual_size),
            SqlValue::BigInt(self.version),
            SqlValue::BigInt(self.lock_time),
            SqlValue::Text(Some(self.block_hash.clone())),
            SqlValue::BigInt(Some(self.block_number)),
            SqlValue::Timestamp(self.block_timestamp),
            SqlValue::BigInt(Some(self.index)),
            SqlValue::BigInt(self.input_count),
            SqlValue::BigInt(self.output_count),
            SqlValue::Double(self.input_value),
            SqlValue::Double(self.output_value),
            SqlValue::Bool(self.is_coinbase),
            SqlValue::Double(self.fee),
        ]);
    }
}

impl TableRow for InputRow {
    const TABLE: TableSpec = INPUTS;

    fn push_values(&self, out: &mut Vec<SqlValue>) {
        let input = &self.input;
        out.extend([
            SqlValue::Date(Some(self.record_date.as_naive())),
            SqlValue::Text(Some(self.transaction_hash.clone())),
            SqlValue::BigInt(Some(self.input_index)),
            SqlValue::Text(input.spent_transaction_hash.clone()),
            SqlValue::BigInt(input.spent_output_index),
            SqlValue::Text(input.script_asm.clone()),
            SqlValue::Text(input.script_hex.clone()),
            SqlValue::BigInt(input.sequence),
            SqlValue::BigInt(input.required_signatures),
            SqlValue::Text(input.input_type.clone()),
            SqlValue::Text(input.address.clone()),
            SqlValue::Double(input.value),
        ]);
    }
}

impl TableRow for OutputRow {
    const TABLE: TableSpec = OUTPUTS;

    fn push_values(&self, out: &mut Vec<SqlValue>) {
        let output = &self.output;
        out.extend([
            SqlValue::Date(Some(self.record_date.as_naive())),
            SqlValue::Text(Some(self.transaction_hash.clone())),
            SqlValue::BigInt(Some(self.output_index)),
            SqlValue::Text(output.script_asm.clone()),
            SqlValue::Text(output.script_hex.clone()),
            SqlValue::BigInt(output.required_signatures),
            SqlValue::Text(output.output_type.clone()),
            SqlValue::Text(output.address.clone()),
            SqlValue::Double(output.value),
        ]);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::flatten_rows;
    use crate::testing::{block, transaction};

    #[test]
    fn test_column_counts_match_values() {
        let mut values = Vec::new();
        block(0, "h0").push_values(&mut values);
        assert_eq!(values.len(), BLOCKS.columns.len());

        let mut tx = transaction(0, "t0", 1, 1);
        let (inputs, outputs) = tx.take_children();

        values.clear();
        tx.push_values(&mut values);
        assert_eq!(values.len(), TRANSACTIONS.columns.len());

        values.clear();
        inputs[0].push_values(&mut values);
        assert_eq!(values.len(), INPUTS.columns.len());

        values.clear();
        outputs[0].push_values(&mut values);
        assert_eq!(values.len(), OUTPUTS.columns.len());
    }

    #[test]
    fn test_flatten_is_row_major() {
        let rows = vec![block(0, "h0"), block(1, "h1")];
        let args = flatten_rows(&rows);
        let width = BLOCKS.columns.len();
        assert_eq!(args.len(), 2 * width);
        assert_eq!(args[1], SqlValue::Text(Some("h0".into())));
        assert_eq!(args[width + 1], SqlValue::Text(Some("h1".into())));
    }

    #[test]
    fn test_record_date_leads_every_row() {
        let mut tx = transaction(3, "t3", 2, 0);
        let (inputs, _) = tx.take_children();
        let args = flatten_rows(&inputs);
        assert_eq!(
            args[0],
            SqlValue::Date(Some(tx.record_date.as_naive()))
        );
        assert_eq!(args[INPUTS.columns.len() + 2], SqlValue::BigInt(Some(1)));
    }
}
