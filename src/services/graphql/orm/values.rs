//! Scalar kinds, bind values and decoded rows.

use std::collections::HashMap;

use async_graphql::Value;

/// Storage/GraphQL scalar kinds understood by the engine.
///
/// Big integers are stored as canonical unsigned decimal text and bytes as
/// lowercase `0x`-prefixed hex text; both surface as strings in GraphQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Int,
    BigInt,
    Boolean,
    Bytes,
}

impl ScalarKind {
    /// GraphQL type name for this kind.
    pub fn graphql_type(&self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Int => "Int",
            ScalarKind::BigInt => "BigInt",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::Bytes => "Bytes",
        }
    }

    /// SQLite column type used when bootstrapping tables.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ScalarKind::Int | ScalarKind::Boolean => "INTEGER",
            ScalarKind::String | ScalarKind::BigInt | ScalarKind::Bytes => "TEXT",
        }
    }
}

/// Represents a SQL value that can be bound to a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl SqlValue {
    /// Bind this value to a sqlx query builder
    pub fn bind_to_query<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        match self {
            SqlValue::String(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
        }
    }
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Null,
    Text(String),
    Int(i64),
    Bool(bool),
}

impl ColumnValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// GraphQL output value; `None` for SQL NULL.
    pub fn to_graphql(&self) -> Option<Value> {
        match self {
            ColumnValue::Null => None,
            ColumnValue::Text(s) => Some(Value::String(s.clone())),
            ColumnValue::Int(i) => Some(Value::from(*i)),
            ColumnValue::Bool(b) => Some(Value::Boolean(*b)),
        }
    }
}

/// One row of an entity table, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRow {
    values: HashMap<String, ColumnValue>,
}

impl EntityRow {
    pub fn new(values: HashMap<String, ColumnValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.values.get(column)
    }

    /// Text value of a column, `None` when absent or NULL.
    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(ColumnValue::as_text)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: ColumnValue) {
        self.values.insert(column.into(), value);
    }
}
