//! ENS subgraph-compatible query engine
//!
//! Serves the legacy subgraph GraphQL dialect (`domains(where: {...})`,
//! `first`/`skip`, `orderBy`) directly from the indexer's relational tables.

pub mod app;
pub mod config;
pub mod db;
pub mod services;

pub use app::{AppState, build_app, prepare_engine};
