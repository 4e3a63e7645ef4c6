//! Error taxonomy for the query engine.
//!
//! Request-scoped errors ([ValidationError], [GuardrailViolation], [DataStoreError])
//! are converted into GraphQL errors carrying an `extensions.code`. Their messages
//! only ever mention GraphQL-level names; table names, column names and SQL text
//! are logged, never returned.
//!
//! [ConfigurationError] is fatal and only produced while the service starts.

use std::sync::Arc;
use std::time::Duration;

use async_graphql::{ErrorExtensions, Pos, ServerError};

/// `extensions.code` of [EngineError::Validation], also given to errors the
/// GraphQL executor raises while parsing or validating a document.
pub const VALIDATION_ERROR_CODE: &str = "VALIDATION_ERROR";

/// A query referenced something the schema does not define, or used it illegally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Type `{0}` is not defined")]
    UnknownEntity(String),

    #[error("Field `{field}` is not defined on `{entity}`")]
    UnknownField { entity: String, field: String },

    #[error("`where` argument for `{entity}` must be an object")]
    FilterNotObject { entity: String },

    #[error("`{key}` is not a filter on `{entity}`")]
    UnknownFilter { entity: String, key: String },

    #[error("Filter `{key}` expects {expected}")]
    InvalidFilterValue { key: String, expected: &'static str },

    #[error("Filter `{key}` does not accept null")]
    NullNotAllowed { key: String },

    #[error("`or` filter on `{entity}` requires at least one condition")]
    EmptyOr { entity: String },

    #[error("`{field}` is not a sortable field of `{entity}`")]
    InvalidOrderBy { entity: String, field: String },

    #[error("`orderDirection` must be `asc` or `desc`")]
    InvalidOrderDirection,

    #[error("`{argument}` must be a non-negative integer")]
    InvalidPaginationArgument { argument: &'static str },

    #[error("The `first` argument must be between 0 and {max}, but is {requested}")]
    FirstTooLarge { requested: i64, max: i64 },

    #[error("The `skip` argument must be between 0 and {max}, but is {requested}")]
    SkipTooLarge { requested: i64, max: i64 },
}

/// Which structural limit a query document exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailKind {
    Depth,
    Aliases,
    Tokens,
}

impl std::fmt::Display for GuardrailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GuardrailKind::Depth => "selection depth",
            GuardrailKind::Aliases => "alias count",
            GuardrailKind::Tokens => "token count",
        })
    }
}

/// A query document exceeded a configured structural limit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Query {kind} exceeds the maximum of {max} (found {actual})")]
pub struct GuardrailViolation {
    pub kind: GuardrailKind,
    pub actual: usize,
    pub max: usize,
}

/// Failure talking to the relational store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DataStoreError {
    #[error("Failed to load data from the store")]
    Query(#[source] Arc<sqlx::Error>),

    #[error("Relation fetch was interrupted before it completed")]
    Interrupted,
}

impl From<sqlx::Error> for DataStoreError {
    fn from(error: sqlx::Error) -> Self {
        DataStoreError::Query(Arc::new(error))
    }
}

/// Startup-time schema/store mismatch. The service must not accept traffic.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("entity `{0}` is declared more than once")]
    DuplicateEntity(String),

    #[error("root field `{field}` is produced by more than one entity")]
    DuplicateRootField { field: String },

    #[error("entity `{entity}` has no backing table")]
    MissingTable { entity: String },

    #[error("field `{entity}.{field}` has no column mapping")]
    MissingColumn { entity: String, field: String },

    #[error("entity `{entity}` declares `{field}` more than once")]
    DuplicateField { entity: String, field: String },

    #[error("entity `{entity}` must declare a non-null `id` field")]
    MissingPrimaryKey { entity: String },

    #[error("relation `{entity}.{relation}` targets unknown entity `{target}`")]
    UnknownRelationTarget {
        entity: String,
        relation: String,
        target: String,
    },

    #[error("relation `{entity}.{relation}` is invalid: {reason}")]
    InvalidRelation {
        entity: String,
        relation: String,
        reason: String,
    },

    #[error("filter key `{key}` on `{entity}` is ambiguous")]
    AmbiguousFilterKey { entity: String, key: String },

    #[error("`{name}` on `{entity}` is a reserved name")]
    ReservedName { entity: String, name: String },

    #[error("table `{table}` for entity `{entity}` does not exist in the store")]
    TableNotInStore { entity: String, table: String },

    #[error("column `{table}.{column}` for `{entity}.{field}` does not exist in the store")]
    ColumnNotInStore {
        entity: String,
        field: String,
        table: String,
        column: String,
    },

    #[error("GraphQL schema could not be built: {0}")]
    Schema(String),

    #[error("store introspection failed: {0}")]
    Store(#[from] sqlx::Error),
}

/// Any request-scoped failure surfaced to a client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Guardrail(#[from] GuardrailViolation),

    #[error(transparent)]
    DataStore(#[from] DataStoreError),

    #[error("Request did not complete within {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl EngineError {
    /// Stable machine-readable code placed in `extensions.code`.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => VALIDATION_ERROR_CODE,
            EngineError::Guardrail(_) => "GUARDRAIL_VIOLATION",
            EngineError::DataStore(_) => "DATA_STORE_ERROR",
            EngineError::Timeout(_) => "TIMEOUT",
        }
    }

    /// Error for failures that are not tied to a position in the document.
    pub fn into_server_error(self) -> ServerError {
        self.extend().into_server_error(Pos::default())
    }
}

impl ErrorExtensions for EngineError {
    fn extend(&self) -> async_graphql::Error {
        let code = self.code();
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| e.set("code", code))
    }
}

impl ErrorExtensions for ValidationError {
    fn extend(&self) -> async_graphql::Error {
        EngineError::from(self.clone()).extend()
    }
}

impl ErrorExtensions for DataStoreError {
    fn extend(&self) -> async_graphql::Error {
        EngineError::from(self.clone()).extend()
    }
}
