//! Application state and HTTP router construction.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::db::{Database, SqliteStore, schema_sync};
use crate::services::graphql::orm::SchemaMapper;
use crate::services::graphql::{QueryEngine, build_schema, entities, service};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<QueryEngine>,
}

/// Build descriptors, check them against the store and assemble the engine.
///
/// With `bootstrap_schema` set, missing tables are created first.
pub async fn prepare_engine(config: &Config, db: &Database) -> Result<QueryEngine> {
    let mapper = Arc::new(
        SchemaMapper::build(entities::definitions()).context("Invalid entity definitions")?,
    );
    info!(entities = mapper.entities().count(), "Entity descriptors built");

    if config.bootstrap_schema {
        let result = schema_sync::bootstrap(db.pool(), &mapper)
            .await
            .context("Failed to bootstrap schema")?;
        info!(
            tables = ?result.tables_created,
            indexes = ?result.indexes_created,
            "Schema bootstrapped"
        );
    }
    schema_sync::verify(db.pool(), &mapper)
        .await
        .context("Store does not match entity descriptors")?;

    let schema = build_schema(mapper, config.pagination).context("Failed to build schema")?;
    info!("GraphQL schema built");

    Ok(QueryEngine::new(
        schema,
        Arc::new(SqliteStore::from(db)),
        config.guardrails,
        config.request_timeout,
    ))
}

/// Build the full Axum router: /graphql plus CORS and trace layers.
pub fn build_app(state: AppState) -> Router<()> {
    Router::new()
        .merge(service::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
