//! In-memory [`BatchWriter`] that records every insert
//!
//! Shared by the crate's unit tests and the integration tests, which include
//! this file directly; both bring the store types into scope of the parent
//! module.
#![allow(dead_code)]

use super::{BatchWriter, Result, SqlValue, TableSpec};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// One successful insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: String,
    pub rows: usize,
    pub prepared: bool,
}

impl Insert {
    pub fn prepared(table: &str, rows: usize) -> Self {
        Self {
            table: table.to_string(),
            rows,
            prepared: true,
        }
    }

    pub fn direct(table: &str, rows: usize) -> Self {
        Self {
            table: table.to_string(),
            rows,
            prepared: false,
        }
    }
}

/// Prepared statement handle: the target table and its row capacity
#[derive(Debug, Clone, Copy)]
pub struct FakeStatement {
    pub table: TableSpec,
    pub rows: usize,
}

#[derive(Default)]
pub struct RecordingWriter {
    inserts: Mutex<Vec<Insert>>,
    rows: Mutex<Vec<String>>,
    statements: Mutex<Vec<String>>,
    attempts: Mutex<Vec<Instant>>,
    failures_left: AtomicUsize,
    ok_executions: Option<usize>,
    always_fail: bool,
    releases: AtomicUsize,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` executions fail with a transient error
    pub fn failing(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Default::default()
        }
    }

    /// The first `ok` executions succeed, every later one fails
    pub fn failing_after(ok: usize) -> Self {
        Self {
            ok_executions: Some(ok),
            ..Default::default()
        }
    }

    /// Every execution fails with a transient error
    pub fn broken() -> Self {
        Self {
            always_fail: true,
            ..Default::default()
        }
    }

    pub fn inserts(&self) -> Vec<Insert> {
        self.inserts.lock().unwrap().clone()
    }

    pub fn rows_for(&self, table: &str) -> usize {
        self.inserts()
            .iter()
            .filter(|insert| insert.table == table)
            .map(|insert| insert.rows)
            .sum()
    }

    /// Every committed row as `table: values`
    pub fn committed_rows(&self) -> BTreeSet<String> {
        self.rows.lock().unwrap().iter().cloned().collect()
    }

    /// Tables a statement was prepared for, in order
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// When each execution was attempted
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn execute(&self, table: TableSpec, args: &[SqlValue], prepared: bool) -> Result<u64> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(Instant::now());
            attempts.len()
        };

        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let exhausted = self.ok_executions.is_some_and(|ok| attempt > ok);
        if self.always_fail || injected || exhausted {
            return Err(std::io::Error::other("connection reset by peer").into());
        }

        let width = table.columns.len();
        assert_eq!(args.len() % width, 0, "args must fill whole rows");
        let rows = args.len() / width;

        self.rows.lock().unwrap().extend(
            args.chunks(width)
                .map(|row| format!("{}: {:?}", table.name, row)),
        );
        self.inserts.lock().unwrap().push(Insert {
            table: table.name.to_string(),
            rows,
            prepared,
        });
        Ok(rows as u64)
    }
}

#[async_trait]
impl BatchWriter for RecordingWriter {
    type Statement = FakeStatement;

    async fn prepare(&self, table: TableSpec, rows: usize) -> Result<FakeStatement> {
        self.statements.lock().unwrap().push(table.name.to_string());
        Ok(FakeStatement { table, rows })
    }

    async fn execute_prepared(&self, statement: &FakeStatement, args: &[SqlValue]) -> Result<u64> {
        assert_eq!(
            args.len(),
            statement.rows * statement.table.columns.len(),
            "prepared statements carry exactly their batch size"
        );
        self.execute(statement.table, args, true)
    }

    async fn execute_direct(&self, table: TableSpec, args: &[SqlValue]) -> Result<u64> {
        self.execute(table, args, false)
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
