//! Relational store capability
//!
//! The loader only needs three things from a store: prepare a reusable
//! multi-row insert, execute it with a flat argument list, and execute an
//! ad-hoc insert once for a final partial batch. [`BatchWriter`] captures
//! exactly that, so the loader can run against Postgres or an in-memory fake.

pub mod postgres;

pub use postgres::{connect_pool, PgBatchWriter};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

/// Postgres accepts at most this many bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;

/// A single bind parameter. `None` binds SQL NULL of the given type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    BigInt(Option<i64>),
    Double(Option<f64>),
    Bool(Option<bool>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
}

/// Target table and its insert column order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

impl TableSpec {
    /// `INSERT ... VALUES (...),(...) ON CONFLICT DO NOTHING` for `rows` rows
    pub fn insert_sql(&self, rows: usize) -> String {
        let width = self.columns.len();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.name,
            self.columns.join(", ")
        );

        for row in 0..rows {
            if row > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for col in 0..width {
                if col > 0 {
                    sql.push_str(", ");
                }
                sql.push('$');
                sql.push_str(&(row * width + col + 1).to_string());
            }
            sql.push(')');
        }

        sql.push_str(" ON CONFLICT DO NOTHING");
        sql
    }

    /// Number of whole rows carried by a flat argument list
    pub fn rows_in(&self, args: &[SqlValue]) -> usize {
        args.len() / self.columns.len().max(1)
    }

    /// Largest row count a single statement can carry
    pub fn max_rows_per_statement(&self) -> usize {
        MAX_BIND_PARAMS / self.columns.len().max(1)
    }
}

/// A record that maps onto one row of a table
pub trait TableRow {
    const TABLE: TableSpec;

    /// Append this row's values in [`TableSpec::columns`] order
    fn push_values(&self, out: &mut Vec<SqlValue>);
}

/// Flatten rows into one argument list, row-major
pub fn flatten_rows<T: TableRow>(rows: &[T]) -> Vec<SqlValue> {
    let mut args = Vec::with_capacity(rows.len() * T::TABLE.columns.len());
    for row in rows {
        row.push_values(&mut args);
    }
    args
}

/// Batched write access to the store, scoped to one file's processing.
///
/// Writers build their own statement text from the [`TableSpec`]; arguments
/// arrive flattened row-major in column order.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    type Statement: Send + Sync;

    /// Prepare a `rows`-row insert into `table` for reuse across many executions
    async fn prepare(&self, table: TableSpec, rows: usize) -> Result<Self::Statement>;

    /// Execute a prepared statement, returning rows affected
    async fn execute_prepared(&self, statement: &Self::Statement, args: &[SqlValue])
        -> Result<u64>;

    /// Execute a one-off insert into `table` sized to `args`, returning rows affected
    async fn execute_direct(&self, table: TableSpec, args: &[SqlValue]) -> Result<u64>;

    /// Give back any resources held for the current file
    async fn release(&self);
}
