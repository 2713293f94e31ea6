//! Postgres implementation of [`BatchWriter`]

use super::{BatchWriter, SqlValue, TableSpec};
use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgStatement};
use sqlx::query::Query;
use sqlx::{Executor, PgPool, Postgres, Statement};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Build the connection pool from configuration
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Writes batches over one pooled connection held for the duration of a file.
///
/// The connection is acquired lazily and dropped after any failure, so a
/// retried call starts on a fresh connection. Prepared statements are keyed by
/// their SQL text and re-prepared transparently on the new connection.
pub struct PgBatchWriter {
    pool: PgPool,
    conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgBatchWriter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            conn: Mutex::new(None),
        }
    }

    async fn connection<'g>(
        &self,
        slot: &'g mut Option<PoolConnection<Postgres>>,
    ) -> Result<&'g mut PoolConnection<Postgres>> {
        let conn = match slot.take() {
            Some(conn) => conn,
            None => {
                debug!("Acquiring database connection");
                self.pool.acquire().await?
            },
        };
        Ok(slot.insert(conn))
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for value in args {
        query = match value {
            SqlValue::Text(v) => query.bind(v.as_deref()),
            SqlValue::BigInt(v) => query.bind(*v),
            SqlValue::Double(v) => query.bind(*v),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Date(v) => query.bind(*v),
            SqlValue::Timestamp(v) => query.bind(*v),
        };
    }
    query
}

#[async_trait]
impl BatchWriter for PgBatchWriter {
    type Statement = PgStatement<'static>;

    async fn prepare(&self, table: TableSpec, rows: usize) -> Result<Self::Statement> {
        let sql = table.insert_sql(rows);
        let mut slot = self.conn.lock().await;
        let conn = self.connection(&mut slot).await?;

        match (&mut **conn).prepare(sql.as_str()).await {
            Ok(statement) => Ok(Statement::to_owned(&statement)),
            Err(e) => {
                slot.take();
                Err(e.into())
            },
        }
    }

    async fn execute_prepared(
        &self,
        statement: &Self::Statement,
        args: &[SqlValue],
    ) -> Result<u64> {
        let mut slot = self.conn.lock().await;
        let conn = self.connection(&mut slot).await?;

        match bind_values(statement.query(), args).execute(&mut **conn).await {
            Ok(done) => Ok(done.rows_affected()),
            Err(e) => {
                slot.take();
                Err(e.into())
            },
        }
    }

    async fn execute_direct(&self, table: TableSpec, args: &[SqlValue]) -> Result<u64> {
        let sql = table.insert_sql(table.rows_in(args));
        let mut slot = self.conn.lock().await;
        let conn = self.connection(&mut slot).await?;

        let query = bind_values(sqlx::query(&sql).persistent(false), args);
        match query.execute(&mut **conn).await {
            Ok(done) => Ok(done.rows_affected()),
            Err(e) => {
                slot.take();
                Err(e.into())
            },
        }
    }

    async fn release(&self) {
        if self.conn.lock().await.take().is_some() {
            debug!("Released database connection");
        }
    }
}
