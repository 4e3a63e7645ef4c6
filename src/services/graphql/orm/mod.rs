//! Relational mapping layer
//!
//! The mapper describes how subgraph entities sit on tables, the builder turns
//! a resolved query into parameterized SQL, and pagination resolves windows
//! and orderings. Everything here is synchronous and does no I/O.

pub mod builder;
pub mod mapper;
pub mod pagination;
pub mod values;

pub use builder::{EntityQuery, SqlParams, SqlStatement};
pub use mapper::{
    ColumnSpec, EntityDef, EntityTypeDescriptor, FieldDescriptor, ForeignKey, Nullability,
    RelationDescriptor, RelationKind, SchemaMapper,
};
pub use pagination::{FirstLimitPolicy, OrderDirection, OrderSpec, PaginationLimits, Window};
pub use values::{ColumnValue, EntityRow, ScalarKind, SqlValue};
