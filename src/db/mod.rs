//! Relational store access
//!
//! [Database] owns the connection pool. Queries run through the [DataStore]
//! abstraction: each request takes one [Snapshot], and every read of that
//! request goes through it so the whole response sees a single consistent view.

pub mod schema_sync;

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::services::graphql::errors::DataStoreError;
use crate::services::graphql::orm::{ColumnValue, EntityRow, ScalarKind, SqlStatement};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn pool_options(max_connections: u32) -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
    }

    fn connect_options(url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
        Ok(SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal))
    }

    /// Create a new database connection pool
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = Self::pool_options(max_connections)
            .connect_with(Self::connect_options(url)?)
            .await?;

        Ok(Self { pool })
    }

    /// Create a new database connection pool with retry logic
    /// Retries every `retry_interval` until successful
    pub async fn connect_with_retry(
        url: &str,
        max_connections: u32,
        retry_interval: Duration,
    ) -> Result<Self> {
        let options = Self::connect_options(url)?;
        loop {
            match Self::pool_options(max_connections)
                .connect_with(options.clone())
                .await
            {
                Ok(pool) => return Ok(Self { pool }),
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_secs = retry_interval.as_secs(),
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// A consistent read view used for the lifetime of one request.
#[async_trait]
pub trait Snapshot: Send + Sync {
    /// Run a SELECT and decode its rows using the statement's column specs.
    async fn fetch(&self, statement: &SqlStatement) -> Result<Vec<EntityRow>, DataStoreError>;
}

/// Source of snapshots. Taking a snapshot does no I/O.
pub trait DataStore: Send + Sync {
    fn snapshot(&self) -> Arc<dyn Snapshot>;
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl From<&Database> for SqliteStore {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}

impl DataStore for SqliteStore {
    fn snapshot(&self) -> Arc<dyn Snapshot> {
        Arc::new(SqliteSnapshot {
            pool: self.pool.clone(),
            tx: Mutex::new(None),
        })
    }
}

/// Read transaction opened on first use and held until the snapshot drops.
///
/// A request that is rejected before its first read never touches the pool.
pub struct SqliteSnapshot {
    pool: SqlitePool,
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

#[async_trait]
impl Snapshot for SqliteSnapshot {
    async fn fetch(&self, statement: &SqlStatement) -> Result<Vec<EntityRow>, DataStoreError> {
        let mut guard = self.tx.lock().await;
        if guard.is_none() {
            *guard = Some(self.pool.begin().await?);
            debug!("Opened read snapshot");
        }
        let tx = guard.as_mut().ok_or(DataStoreError::Interrupted)?;

        let started = Instant::now();
        let mut query = sqlx::query(&statement.sql);
        for value in &statement.params {
            query = value.bind_to_query(query);
        }
        let rows = query.fetch_all(&mut **tx).await.map_err(|e| {
            warn!(error = %e, sql = %statement.sql, "Store query failed");
            DataStoreError::from(e)
        })?;

        debug!(
            sql = %statement.sql,
            params = statement.params.len(),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Store query"
        );

        rows.iter()
            .map(|row| decode_row(row, statement))
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(DataStoreError::from)
    }
}

/// Decode one row according to the statement's column kinds.
fn decode_row(row: &SqliteRow, statement: &SqlStatement) -> Result<EntityRow, sqlx::Error> {
    let mut entity = EntityRow::default();
    for column in &statement.columns {
        let name = column.name.as_str();
        let value = match column.kind {
            ScalarKind::String | ScalarKind::BigInt | ScalarKind::Bytes => row
                .try_get::<Option<String>, _>(name)?
                .map(ColumnValue::Text),
            ScalarKind::Int => row.try_get::<Option<i64>, _>(name)?.map(ColumnValue::Int),
            ScalarKind::Boolean => row.try_get::<Option<bool>, _>(name)?.map(ColumnValue::Bool),
        };
        entity.insert(name, value.unwrap_or(ColumnValue::Null));
    }
    Ok(entity)
}
