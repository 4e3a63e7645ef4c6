//! Subgraph-compatible GraphQL layer
//!
//! Entity descriptors come from [entities] through the [orm] mapper; [schema]
//! turns them into a dynamic schema whose resolvers plan through [resolvers]
//! and batch relations through [loaders]. [service] wraps it all in the
//! request pipeline.

pub mod entities;
pub mod errors;
pub mod filters;
pub mod guardrails;
pub mod loaders;
pub mod orm;
pub mod propagation;
pub mod resolvers;
pub mod schema;
pub mod service;

pub use errors::{ConfigurationError, EngineError, ValidationError};
pub use guardrails::GuardrailLimits;
pub use schema::{SubgraphSchema, build_schema};
pub use service::QueryEngine;
