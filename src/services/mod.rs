//! Engine services

pub mod graphql;

pub use graphql::QueryEngine;
