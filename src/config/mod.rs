//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::graphql::guardrails::GuardrailLimits;
use crate::services::graphql::orm::{FirstLimitPolicy, PaginationLimits};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub host: String,

    /// Server port
    pub port: u16,

    /// SQLite URL of the indexer database (e.g. `sqlite://./data/ens.db`)
    pub database_url: String,

    /// Pool size
    pub database_max_connections: u32,

    pub pagination: PaginationLimits,

    pub guardrails: GuardrailLimits,

    /// Per-request execution budget
    pub request_timeout: Duration,

    /// Create missing entity tables at startup instead of failing verification
    pub bootstrap_schema: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = PaginationLimits::default();
        let guardrails = GuardrailLimits::default();

        let first_policy = match lookup("FIRST_LIMIT_POLICY") {
            Some(value) => value
                .parse::<FirstLimitPolicy>()
                .map_err(anyhow::Error::msg)
                .context("Invalid FIRST_LIMIT_POLICY")?,
            None => defaults.first_policy,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),

            port: parse_or(&lookup, "PORT", 8000)?,

            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://./data/ens.db".to_string()),

            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 8)?,

            pagination: PaginationLimits {
                default_first: parse_or(&lookup, "DEFAULT_FIRST", defaults.default_first)?,
                max_first: parse_or(&lookup, "MAX_FIRST", defaults.max_first)?,
                max_skip: parse_or(&lookup, "MAX_SKIP", defaults.max_skip)?,
                first_policy,
            },

            guardrails: GuardrailLimits {
                max_depth: parse_or(&lookup, "MAX_QUERY_DEPTH", guardrails.max_depth)?,
                max_aliases: parse_or(&lookup, "MAX_QUERY_ALIASES", guardrails.max_aliases)?,
                max_tokens: parse_or(&lookup, "MAX_QUERY_TOKENS", guardrails.max_tokens)?,
            },

            request_timeout: Duration::from_millis(parse_or(
                &lookup,
                "REQUEST_TIMEOUT_MS",
                10_000,
            )?),

            bootstrap_schema: lookup("BOOTSTRAP_SCHEMA")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}
