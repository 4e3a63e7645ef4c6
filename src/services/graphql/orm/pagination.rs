//! Pagination and ordering for list fields.
//!
//! List queries use subgraph offset pagination: `first`/`skip` plus a single
//! `orderBy` field and `orderDirection`. Every ordering is made total by
//! appending the primary key ascending, so equal sort keys page consistently.

use std::str::FromStr;

use super::mapper::{EntityTypeDescriptor, PRIMARY_KEY};
use super::values::ScalarKind;
use crate::services::graphql::errors::ValidationError;

/// What to do when `first` exceeds the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstLimitPolicy {
    #[default]
    Reject,
    Clamp,
}

impl FromStr for FirstLimitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(FirstLimitPolicy::Reject),
            "clamp" => Ok(FirstLimitPolicy::Clamp),
            other => Err(format!("unknown first limit policy `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationLimits {
    pub default_first: i64,
    pub max_first: i64,
    pub max_skip: i64,
    pub first_policy: FirstLimitPolicy,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self {
            default_first: 100,
            max_first: 1000,
            max_skip: 5000,
            first_policy: FirstLimitPolicy::Reject,
        }
    }
}

/// A resolved `first`/`skip` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub first: i64,
    pub skip: i64,
}

impl Window {
    /// Validate and default the raw arguments.
    pub fn resolve(
        first: Option<i64>,
        skip: Option<i64>,
        limits: &PaginationLimits,
    ) -> Result<Self, ValidationError> {
        let first = first.unwrap_or(limits.default_first);
        let skip = skip.unwrap_or(0);

        if first < 0 {
            return Err(ValidationError::InvalidPaginationArgument { argument: "first" });
        }
        if skip < 0 {
            return Err(ValidationError::InvalidPaginationArgument { argument: "skip" });
        }

        let first = if first > limits.max_first {
            match limits.first_policy {
                FirstLimitPolicy::Reject => {
                    return Err(ValidationError::FirstTooLarge {
                        requested: first,
                        max: limits.max_first,
                    });
                }
                FirstLimitPolicy::Clamp => limits.max_first,
            }
        } else {
            first
        };

        if skip > limits.max_skip {
            return Err(ValidationError::SkipTooLarge {
                requested: skip,
                max: limits.max_skip,
            });
        }

        Ok(Self { first, skip })
    }

    /// Exclusive upper bound of the row range.
    pub fn end(&self) -> i64 {
        self.skip.saturating_add(self.first)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "asc" => Ok(OrderDirection::Asc),
            "desc" => Ok(OrderDirection::Desc),
            _ => Err(ValidationError::InvalidOrderDirection),
        }
    }
}

/// A total ordering over an entity's rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderSpec {
    pub column: String,
    pub kind: ScalarKind,
    pub direction: OrderDirection,
    /// Primary key column appended ascending when not already the sort key
    pub tiebreak: Option<String>,
}

impl OrderSpec {
    /// Default ordering: primary key ascending.
    pub fn by_id(entity: &EntityTypeDescriptor) -> Self {
        Self {
            column: entity.id_column().to_string(),
            kind: ScalarKind::String,
            direction: OrderDirection::Asc,
            tiebreak: None,
        }
    }

    /// Resolve `orderBy`/`orderDirection` against the entity's scalar fields.
    pub fn resolve(
        entity: &EntityTypeDescriptor,
        order_by: Option<&str>,
        direction: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let direction = direction
            .map(OrderDirection::parse)
            .transpose()?
            .unwrap_or_default();

        let field_name = order_by.unwrap_or(PRIMARY_KEY);
        let field = entity
            .field(field_name)
            .ok_or_else(|| ValidationError::InvalidOrderBy {
                entity: entity.name.clone(),
                field: field_name.to_string(),
            })?;

        let id_column = entity.id_column();
        let tiebreak = (field.column != id_column).then(|| id_column.to_string());

        Ok(Self {
            column: field.column.clone(),
            kind: field.kind,
            direction,
            tiebreak,
        })
    }

    /// ORDER BY terms (without the keyword).
    pub fn to_sql(&self) -> String {
        let dir = self.direction.to_sql();
        let mut terms = match self.kind {
            // canonical decimals: shorter is smaller
            ScalarKind::BigInt => vec![
                format!("length(\"{}\") {}", self.column, dir),
                format!("\"{}\" {}", self.column, dir),
            ],
            _ => vec![format!("\"{}\" {}", self.column, dir)],
        };
        if let Some(tiebreak) = &self.tiebreak {
            terms.push(format!("\"{}\" ASC", tiebreak));
        }
        terms.join(", ")
    }
}
