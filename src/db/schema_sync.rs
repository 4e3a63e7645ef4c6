//! Store schema verification and bootstrap
//!
//! At startup every mapped table and column must exist in the store; a missing
//! one is a fatal [ConfigurationError]. For empty development databases the
//! tables can also be created from the mapper's descriptors.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::services::graphql::errors::ConfigurationError;
use crate::services::graphql::orm::{EntityTypeDescriptor, SchemaMapper};

/// Result of a bootstrap run
#[derive(Debug, Default)]
pub struct SchemaSyncResult {
    pub tables_created: Vec<String>,
    pub indexes_created: Vec<String>,
}

/// Check if a table exists in the database
async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool, sqlx::Error> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?;

    Ok(result.is_some())
}

/// Get existing columns for a table
async fn get_table_columns(
    pool: &SqlitePool,
    table_name: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(i32, String, String, i32, Option<String>, i32)> =
        sqlx::query_as(&format!("PRAGMA table_info(\"{}\")", table_name))
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(_, name, _, _, _, _)| name).collect())
}

/// Foreign key columns worth indexing: forward references of `entity`.
fn index_columns(entity: &EntityTypeDescriptor) -> Vec<&str> {
    let mut columns: Vec<&str> = entity
        .relations
        .iter()
        .filter_map(|r| r.parent_column())
        .collect();
    columns.dedup();
    columns
}

/// Create missing tables (and their foreign key indexes) for every entity.
pub async fn bootstrap(
    pool: &SqlitePool,
    mapper: &SchemaMapper,
) -> Result<SchemaSyncResult, sqlx::Error> {
    let mut result = SchemaSyncResult::default();

    for entity in mapper.entities() {
        if !table_exists(pool, &entity.table).await? {
            let create_sql = entity.create_table_sql();
            debug!("Creating table {}: {}", entity.table, create_sql);
            sqlx::query(&create_sql).execute(pool).await?;
            info!("Created table: {}", entity.table);
            result.tables_created.push(entity.table.clone());
        }

        for column in index_columns(entity) {
            let index = format!("idx_{}_{}", entity.table, column);
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\" (\"{}\")",
                index, entity.table, column
            ))
            .execute(pool)
            .await?;
            result.indexes_created.push(index);
        }
    }

    Ok(result)
}

/// Confirm every mapped table and column exists in the store.
pub async fn verify(pool: &SqlitePool, mapper: &SchemaMapper) -> Result<(), ConfigurationError> {
    for entity in mapper.entities() {
        if !table_exists(pool, &entity.table).await? {
            return Err(ConfigurationError::TableNotInStore {
                entity: entity.name.clone(),
                table: entity.table.clone(),
            });
        }

        let existing = get_table_columns(pool, &entity.table).await?;
        for column in entity.columns() {
            if !existing.iter().any(|c| c == &column.name) {
                let field = entity
                    .fields
                    .iter()
                    .find(|f| f.column == column.name)
                    .map(|f| f.name.clone())
                    .or_else(|| {
                        entity
                            .relations
                            .iter()
                            .find(|r| r.parent_column() == Some(column.name.as_str()))
                            .map(|r| r.name.clone())
                    })
                    .unwrap_or_default();
                return Err(ConfigurationError::ColumnNotInStore {
                    entity: entity.name.clone(),
                    field,
                    table: entity.table.clone(),
                    column: column.name,
                });
            }
        }
        debug!(entity = %entity.name, table = %entity.table, "Verified store mapping");
    }

    info!(entities = mapper.entities().count(), "Store schema verified");
    Ok(())
}
