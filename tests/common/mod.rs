//! Shared fixtures: an in-memory ENS store and a recording [DataStore].

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_graphql::Request;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use ens_subgraph_compat::db::{DataStore, Database, Snapshot, SqliteStore, schema_sync};
use ens_subgraph_compat::services::graphql::errors::DataStoreError;
use ens_subgraph_compat::services::graphql::orm::{
    EntityRow, PaginationLimits, SchemaMapper, SqlStatement,
};
use ens_subgraph_compat::services::graphql::{GuardrailLimits, QueryEngine, build_schema, entities};

/// Records every statement and optionally injects failures or latency.
#[derive(Default)]
pub struct Recorder {
    statements: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
    delays: Mutex<Vec<(String, Duration)>>,
    write_after_next: Mutex<Option<(SqlitePool, String)>>,
}

impl Recorder {
    pub fn calls(&self) -> usize {
        self.statements.lock().len()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn reset(&self) {
        self.statements.lock().clear();
    }

    /// Fail every statement whose SQL contains `needle`.
    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock() = Some(needle.to_string());
    }

    pub fn delay(&self, delay: Duration) {
        self.delay_on("", delay);
    }

    /// Hold every statement whose SQL contains `needle` for `delay`.
    pub fn delay_on(&self, needle: &str, delay: Duration) {
        self.delays.lock().push((needle.to_string(), delay));
    }

    /// Run `sql` on `pool` once the next statement has returned its rows.
    pub fn write_after_next(&self, pool: &SqlitePool, sql: &str) {
        *self.write_after_next.lock() = Some((pool.clone(), sql.to_string()));
    }
}

pub struct RecordingStore {
    inner: SqliteStore,
    recorder: Arc<Recorder>,
}

impl DataStore for RecordingStore {
    fn snapshot(&self) -> Arc<dyn Snapshot> {
        Arc::new(RecordingSnapshot {
            inner: self.inner.snapshot(),
            recorder: self.recorder.clone(),
        })
    }
}

struct RecordingSnapshot {
    inner: Arc<dyn Snapshot>,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Snapshot for RecordingSnapshot {
    async fn fetch(&self, statement: &SqlStatement) -> Result<Vec<EntityRow>, DataStoreError> {
        self.recorder.statements.lock().push(statement.sql.clone());

        let delay = self
            .recorder
            .delays
            .lock()
            .iter()
            .filter(|(needle, _)| statement.sql.contains(needle.as_str()))
            .map(|(_, delay)| *delay)
            .max();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let fail = self
            .recorder
            .fail_on
            .lock()
            .as_ref()
            .is_some_and(|needle| statement.sql.contains(needle.as_str()));
        if fail {
            return Err(DataStoreError::from(sqlx::Error::Protocol(format!(
                "injected failure: {}",
                statement.sql
            ))));
        }
        let rows = self.inner.fetch(statement).await;

        let write = self.recorder.write_after_next.lock().take();
        if let Some((pool, sql)) = write {
            sqlx::query(&sql).execute(&pool).await.unwrap();
        }
        rows
    }
}

pub fn mapper() -> Arc<SchemaMapper> {
    Arc::new(SchemaMapper::build(entities::definitions()).unwrap())
}

/// Single-connection in-memory database with the entity tables created.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema_sync::bootstrap(&pool, &mapper()).await.unwrap();
    pool
}

/// File-backed WAL database, so concurrent connections see real snapshots.
pub async fn disk_pool() -> SqlitePool {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let path: PathBuf = std::env::temp_dir().join(format!(
        "ens-subgraph-compat-{}-{}.db",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = std::fs::remove_file(&path);

    let database = Database::connect(&format!("sqlite://{}", path.display()), 4)
        .await
        .unwrap();
    let pool = database.pool().clone();
    schema_sync::bootstrap(&pool, &mapper()).await.unwrap();
    pool
}

pub async fn execute_all(pool: &SqlitePool, statements: &[&str]) {
    for sql in statements {
        sqlx::query(sql).execute(pool).await.unwrap();
    }
}

/// Three accounts, five domains under `eth`, two registrations, one resolver,
/// one wrapped name.
pub async fn seed_ens(pool: &SqlitePool) {
    execute_all(
        pool,
        &[
            "INSERT INTO accounts (id) VALUES ('0xaaa'), ('0xbbb'), ('0xccc')",
            "INSERT INTO domains (id, name, label_name, subdomain_count, is_migrated, created_at, expiry_date, parent_id, owner_id, registrant_id, resolver_id, resolved_address_id) VALUES
                ('d-eth', 'eth', 'eth', 4, 1, '1', NULL, NULL, '0xaaa', NULL, NULL, NULL),
                ('d-alice', 'alice.eth', 'alice', 0, 1, '100', '1700000001', 'd-eth', '0xaaa', '0xaaa', 'res-alice', '0xaaa'),
                ('d-bob', 'bob.eth', 'bob', 0, 0, '100', '1699999999', 'd-eth', '0xbbb', '0xbbb', NULL, NULL),
                ('d-carol', 'carol.eth', 'carol', 0, 1, '100', '18446744073709551617', 'd-eth', '0xbbb', NULL, NULL, NULL),
                ('d-dave', 'Dave.eth', 'Dave', 0, 0, '200', '9007199254740993', 'd-eth', '0xccc', NULL, NULL, NULL)",
            "INSERT INTO registrations (id, registration_date, expiry_date, cost, label_name, domain_id, registrant_id) VALUES
                ('r-alice', '10', '1700000001', '5000000000000000000', 'alice', 'd-alice', '0xaaa'),
                ('r-bob', '20', '1699999999', NULL, 'bob', 'd-bob', '0xbbb')",
            "INSERT INTO resolvers (id, address, content_hash, domain_id, addr_id) VALUES
                ('res-alice', '0x1234', NULL, 'd-alice', '0xaaa')",
            "INSERT INTO wrapped_domains (id, expiry_date, fuses, name, domain_id, owner_id) VALUES
                ('w-carol', '18446744073709551617', 65537, 'carol.eth', 'd-carol', '0xbbb')",
        ],
    )
    .await;
}

pub struct Harness {
    pub engine: QueryEngine,
    pub recorder: Arc<Recorder>,
    pub pool: SqlitePool,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_limits(
            PaginationLimits::default(),
            GuardrailLimits::default(),
            Duration::from_secs(5),
        )
        .await
    }

    pub async fn with_limits(
        pagination: PaginationLimits,
        guardrails: GuardrailLimits,
        timeout: Duration,
    ) -> Self {
        Self::over(memory_pool().await, pagination, guardrails, timeout).await
    }

    /// Seeded harness over a file-backed database.
    pub async fn on_disk() -> Self {
        Self::over(
            disk_pool().await,
            PaginationLimits::default(),
            GuardrailLimits::default(),
            Duration::from_secs(5),
        )
        .await
    }

    async fn over(
        pool: SqlitePool,
        pagination: PaginationLimits,
        guardrails: GuardrailLimits,
        timeout: Duration,
    ) -> Self {
        seed_ens(&pool).await;

        let recorder = Arc::new(Recorder::default());
        let store = RecordingStore {
            inner: SqliteStore::new(pool.clone()),
            recorder: recorder.clone(),
        };
        let schema = build_schema(mapper(), pagination).unwrap();
        let engine = QueryEngine::new(schema, Arc::new(store), guardrails, timeout);
        Self { engine, recorder, pool }
    }

    /// Execute a query and return the serialized `{data, errors}` envelope.
    pub async fn query(&self, query: &str) -> serde_json::Value {
        let response = self.engine.execute(Request::new(query)).await;
        serde_json::to_value(&response).unwrap()
    }
}

/// `extensions.code` of every error in an envelope.
pub fn error_codes(envelope: &serde_json::Value) -> Vec<String> {
    envelope["errors"]
        .as_array()
        .map(|errors| {
            errors
                .iter()
                .map(|e| e["extensions"]["code"].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}
