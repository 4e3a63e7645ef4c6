//! Filter compiler
//!
//! Turns a subgraph-style `where` object into a [FilterNode] tree and renders it
//! as a parameterized SQL predicate. Keys are `<field>` (equality) or
//! `<field>_<operator>`, plus the `and`/`or` combinators which take lists of
//! nested filter objects. Top-level keys and combinators are AND-ed together.
//!
//! Storage conventions the rendering relies on:
//! - BigInt columns hold canonical unsigned decimal text, so ordering compares
//!   length first and then the text.
//! - Bytes columns hold lowercase `0x`-prefixed hex.
//! - Case-insensitive matching folds ASCII only.

use async_graphql::Value;
use num_bigint::BigUint;

use super::errors::ValidationError;
use super::orm::builder::SqlParams;
use super::orm::mapper::{EntityTypeDescriptor, FilterTarget};
use super::orm::values::{ScalarKind, SqlValue};

/// A filter operator, named by its key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Not,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
    ContainsNocase,
    NotContainsNocase,
    StartsWith,
    NotStartsWith,
    StartsWithNocase,
    NotStartsWithNocase,
    EndsWith,
    NotEndsWith,
    EndsWithNocase,
    NotEndsWithNocase,
}

const COMPARABLE: &[FilterOp] = &[
    FilterOp::Eq,
    FilterOp::Not,
    FilterOp::Gt,
    FilterOp::Lt,
    FilterOp::Gte,
    FilterOp::Lte,
    FilterOp::In,
    FilterOp::NotIn,
];

const EQUATABLE: &[FilterOp] = &[FilterOp::Eq, FilterOp::Not, FilterOp::In, FilterOp::NotIn];

impl FilterOp {
    pub const ALL: &'static [FilterOp] = &[
        FilterOp::Eq,
        FilterOp::Not,
        FilterOp::Gt,
        FilterOp::Lt,
        FilterOp::Gte,
        FilterOp::Lte,
        FilterOp::In,
        FilterOp::NotIn,
        FilterOp::Contains,
        FilterOp::NotContains,
        FilterOp::ContainsNocase,
        FilterOp::NotContainsNocase,
        FilterOp::StartsWith,
        FilterOp::NotStartsWith,
        FilterOp::StartsWithNocase,
        FilterOp::NotStartsWithNocase,
        FilterOp::EndsWith,
        FilterOp::NotEndsWith,
        FilterOp::EndsWithNocase,
        FilterOp::NotEndsWithNocase,
    ];

    /// Operators legal for a scalar kind.
    pub fn for_kind(kind: ScalarKind) -> &'static [FilterOp] {
        match kind {
            ScalarKind::String => Self::ALL,
            ScalarKind::Int | ScalarKind::BigInt => COMPARABLE,
            ScalarKind::Boolean | ScalarKind::Bytes => EQUATABLE,
        }
    }

    /// Key suffix, `None` for bare equality.
    pub fn suffix(&self) -> Option<&'static str> {
        Some(match self {
            FilterOp::Eq => return None,
            FilterOp::Not => "not",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::NotIn => "not_in",
            FilterOp::Contains => "contains",
            FilterOp::NotContains => "not_contains",
            FilterOp::ContainsNocase => "contains_nocase",
            FilterOp::NotContainsNocase => "not_contains_nocase",
            FilterOp::StartsWith => "starts_with",
            FilterOp::NotStartsWith => "not_starts_with",
            FilterOp::StartsWithNocase => "starts_with_nocase",
            FilterOp::NotStartsWithNocase => "not_starts_with_nocase",
            FilterOp::EndsWith => "ends_with",
            FilterOp::NotEndsWith => "not_ends_with",
            FilterOp::EndsWithNocase => "ends_with_nocase",
            FilterOp::NotEndsWithNocase => "not_ends_with_nocase",
        })
    }

    /// The `where` key for this operator applied to `field`.
    pub fn key_for(&self, field: &str) -> String {
        match self.suffix() {
            Some(suffix) => format!("{}_{}", field, suffix),
            None => field.to_string(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }

    fn is_match(&self) -> bool {
        !matches!(
            self,
            FilterOp::Eq
                | FilterOp::Not
                | FilterOp::Gt
                | FilterOp::Lt
                | FilterOp::Gte
                | FilterOp::Lte
                | FilterOp::In
                | FilterOp::NotIn
        )
    }
}

/// A typed filter operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Text(String),
    Int(i64),
    Bool(bool),
    BigInt(BigUint),
}

impl Literal {
    fn to_sql_value(&self) -> SqlValue {
        match self {
            Literal::Text(s) => SqlValue::String(s.clone()),
            Literal::Int(i) => SqlValue::Int(*i),
            Literal::Bool(b) => SqlValue::Bool(*b),
            Literal::BigInt(n) => SqlValue::String(n.to_string()),
        }
    }
}

/// Shape of a string match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPosition {
    Anywhere,
    Prefix,
    Suffix,
}

/// Compiled, validated filter tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterNode {
    Compare {
        column: String,
        kind: ScalarKind,
        op: FilterOp,
        value: Literal,
    },
    Match {
        column: String,
        position: MatchPosition,
        case_sensitive: bool,
        negated: bool,
        pattern: String,
    },
    List {
        column: String,
        negated: bool,
        values: Vec<Literal>,
    },
    Null {
        column: String,
        negated: bool,
    },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

impl FilterNode {
    /// A filter that matches every row.
    pub fn always() -> Self {
        FilterNode::And(Vec::new())
    }

    pub fn is_always(&self) -> bool {
        match self {
            FilterNode::And(children) => children.iter().all(FilterNode::is_always),
            FilterNode::Or(children) => children.iter().any(FilterNode::is_always),
            _ => false,
        }
    }

    /// AND this filter with another.
    pub fn and(self, other: FilterNode) -> Self {
        match (self, other) {
            (a, b) if b.is_always() => a,
            (a, b) if a.is_always() => b,
            (FilterNode::And(mut children), b) => {
                children.push(b);
                FilterNode::And(children)
            }
            (a, b) => FilterNode::And(vec![a, b]),
        }
    }

    /// Render as a SQL predicate, pushing bind values into `params`.
    pub fn to_sql(&self, params: &mut SqlParams) -> String {
        if self.is_always() {
            return "1 = 1".to_string();
        }
        match self {
            FilterNode::Compare {
                column,
                kind,
                op,
                value,
            } => render_compare(column, *kind, *op, value, params),
            FilterNode::Match {
                column,
                position,
                case_sensitive,
                negated,
                pattern,
            } => {
                let not = if *negated { "NOT " } else { "" };
                if *case_sensitive {
                    let p = params.push(SqlValue::String(glob_pattern(pattern, *position)));
                    format!("\"{}\" {}GLOB {}", column, not, p)
                } else {
                    let p = params.push(SqlValue::String(like_pattern(pattern, *position)));
                    format!("\"{}\" {}LIKE {} ESCAPE '\\'", column, not, p)
                }
            }
            FilterNode::List {
                column,
                negated,
                values,
            } => {
                if values.is_empty() {
                    return if *negated {
                        format!("\"{}\" IS NOT NULL", column)
                    } else {
                        "0 = 1".to_string()
                    };
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| params.push(v.to_sql_value()))
                    .collect();
                let not = if *negated { "NOT " } else { "" };
                format!("\"{}\" {}IN ({})", column, not, placeholders.join(", "))
            }
            FilterNode::Null { column, negated } => {
                if *negated {
                    format!("\"{}\" IS NOT NULL", column)
                } else {
                    format!("\"{}\" IS NULL", column)
                }
            }
            FilterNode::And(children) => join(children, " AND ", params),
            FilterNode::Or(children) if children.is_empty() => "0 = 1".to_string(),
            FilterNode::Or(children) => join(children, " OR ", params),
        }
    }
}

fn join(children: &[FilterNode], separator: &str, params: &mut SqlParams) -> String {
    let parts: Vec<String> = children
        .iter()
        .filter(|c| !(separator == " AND " && c.is_always()))
        .map(|c| format!("({})", c.to_sql(params)))
        .collect();
    parts.join(separator)
}

fn render_compare(
    column: &str,
    kind: ScalarKind,
    op: FilterOp,
    value: &Literal,
    params: &mut SqlParams,
) -> String {
    let sql_op = match op {
        FilterOp::Eq => "=",
        FilterOp::Not => "!=",
        FilterOp::Gt => ">",
        FilterOp::Lt => "<",
        FilterOp::Gte => ">=",
        FilterOp::Lte => "<=",
        _ => "=",
    };

    match (kind, value) {
        (ScalarKind::BigInt, Literal::BigInt(n)) if !matches!(op, FilterOp::Eq | FilterOp::Not) => {
            // Canonical decimals order by length, then lexically
            let digits = n.to_string();
            let length = params.push(SqlValue::Int(digits.len() as i64));
            let text = params.push(SqlValue::String(digits));
            let strict = if matches!(op, FilterOp::Gt | FilterOp::Gte) {
                ">"
            } else {
                "<"
            };
            format!(
                "(length(\"{c}\") {strict} {length} OR (length(\"{c}\") = {length} AND \"{c}\" {sql_op} {text}))",
                c = column,
            )
        }
        _ => {
            let p = params.push(value.to_sql_value());
            format!("\"{}\" {} {}", column, sql_op, p)
        }
    }
}

fn glob_pattern(text: &str, position: MatchPosition) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '*' => escaped.push_str("[*]"),
            '?' => escaped.push_str("[?]"),
            '[' => escaped.push_str("[[]"),
            c => escaped.push(c),
        }
    }
    wrap(escaped, position, "*")
}

fn like_pattern(text: &str, position: MatchPosition) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    wrap(escaped, position, "%")
}

fn wrap(escaped: String, position: MatchPosition, wildcard: &str) -> String {
    match position {
        MatchPosition::Anywhere => format!("{wildcard}{escaped}{wildcard}"),
        MatchPosition::Prefix => format!("{escaped}{wildcard}"),
        MatchPosition::Suffix => format!("{wildcard}{escaped}"),
    }
}

/// Compile a `where` argument for `entity`.
///
/// `Value::Null` (argument given as null) matches everything.
pub fn compile(entity: &EntityTypeDescriptor, input: &Value) -> Result<FilterNode, ValidationError> {
    match input {
        Value::Null => Ok(FilterNode::always()),
        Value::Object(map) => {
            let mut conjuncts = Vec::with_capacity(map.len());
            for (key, value) in map {
                match key.as_str() {
                    "and" => {
                        let children = compile_group(entity, value)?;
                        conjuncts.push(FilterNode::And(children));
                    }
                    "or" => {
                        if matches!(value, Value::Null) {
                            continue;
                        }
                        let children = compile_group(entity, value)?;
                        if children.is_empty() {
                            return Err(ValidationError::EmptyOr {
                                entity: entity.name.clone(),
                            });
                        }
                        conjuncts.push(FilterNode::Or(children));
                    }
                    key => conjuncts.push(compile_condition(entity, key, value)?),
                }
            }
            Ok(FilterNode::And(conjuncts))
        }
        _ => Err(ValidationError::FilterNotObject {
            entity: entity.name.clone(),
        }),
    }
}

fn compile_group(
    entity: &EntityTypeDescriptor,
    value: &Value,
) -> Result<Vec<FilterNode>, ValidationError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => items.iter().map(|item| compile(entity, item)).collect(),
        // single values coerce to one-element lists
        Value::Object(_) => Ok(vec![compile(entity, value)?]),
        _ => Err(ValidationError::FilterNotObject {
            entity: entity.name.clone(),
        }),
    }
}

fn compile_condition(
    entity: &EntityTypeDescriptor,
    key: &str,
    value: &Value,
) -> Result<FilterNode, ValidationError> {
    let unknown = || ValidationError::UnknownFilter {
        entity: entity.name.clone(),
        key: key.to_string(),
    };
    let (target, op) = entity.resolve_filter_key(key).ok_or_else(unknown)?;
    if !target.operators.contains(&op) {
        return Err(unknown());
    }
    let column = target.column.to_string();

    if matches!(value, Value::Null) {
        return match op {
            FilterOp::Eq => Ok(FilterNode::Null {
                column,
                negated: false,
            }),
            FilterOp::Not => Ok(FilterNode::Null {
                column,
                negated: true,
            }),
            _ => Err(ValidationError::NullNotAllowed {
                key: key.to_string(),
            }),
        };
    }

    if op.is_list() {
        let items = match value {
            Value::List(items) => items.as_slice(),
            single => std::slice::from_ref(single),
        };
        let values = items
            .iter()
            .map(|item| {
                if matches!(item, Value::Null) {
                    Err(ValidationError::InvalidFilterValue {
                        key: key.to_string(),
                        expected: "a list of non-null values",
                    })
                } else {
                    literal(&target, key, item)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(FilterNode::List {
            column,
            negated: op == FilterOp::NotIn,
            values,
        });
    }

    let value = literal(&target, key, value)?;

    if op.is_match() {
        let Literal::Text(pattern) = value else {
            return Err(unknown());
        };
        let (position, case_sensitive, negated) = match op {
            FilterOp::Contains => (MatchPosition::Anywhere, true, false),
            FilterOp::NotContains => (MatchPosition::Anywhere, true, true),
            FilterOp::ContainsNocase => (MatchPosition::Anywhere, false, false),
            FilterOp::NotContainsNocase => (MatchPosition::Anywhere, false, true),
            FilterOp::StartsWith => (MatchPosition::Prefix, true, false),
            FilterOp::NotStartsWith => (MatchPosition::Prefix, true, true),
            FilterOp::StartsWithNocase => (MatchPosition::Prefix, false, false),
            FilterOp::NotStartsWithNocase => (MatchPosition::Prefix, false, true),
            FilterOp::EndsWith => (MatchPosition::Suffix, true, false),
            FilterOp::NotEndsWith => (MatchPosition::Suffix, true, true),
            FilterOp::EndsWithNocase => (MatchPosition::Suffix, false, false),
            _ => (MatchPosition::Suffix, false, true),
        };
        return Ok(FilterNode::Match {
            column,
            position,
            case_sensitive,
            negated,
            pattern,
        });
    }

    Ok(FilterNode::Compare {
        column,
        kind: target.kind,
        op,
        value,
    })
}

/// Coerce a GraphQL input value to the operand type of `target`.
fn literal(target: &FilterTarget<'_>, key: &str, value: &Value) -> Result<Literal, ValidationError> {
    let invalid = |expected| ValidationError::InvalidFilterValue {
        key: key.to_string(),
        expected,
    };

    match target.kind {
        ScalarKind::String => match value {
            Value::String(s) => Ok(Literal::Text(s.clone())),
            _ => Err(invalid(if target.is_id { "an ID" } else { "a string" })),
        },
        ScalarKind::Int => match value {
            Value::Number(n) => n.as_i64().map(Literal::Int).ok_or(invalid("an integer")),
            _ => Err(invalid("an integer")),
        },
        ScalarKind::Boolean => match value {
            Value::Boolean(b) => Ok(Literal::Bool(*b)),
            _ => Err(invalid("a boolean")),
        },
        ScalarKind::BigInt => parse_big_int(value)
            .map(Literal::BigInt)
            .ok_or(invalid("a non-negative integer")),
        ScalarKind::Bytes => match value {
            Value::String(s) => parse_bytes(s)
                .map(Literal::Text)
                .ok_or(invalid("0x-prefixed hex bytes")),
            _ => Err(invalid("0x-prefixed hex bytes")),
        },
    }
}

/// Accepts decimal strings and unsigned JSON integers.
pub fn parse_big_int(value: &Value) -> Option<BigUint> {
    match value {
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        Value::Number(n) => n.as_u64().map(BigUint::from),
        _ => None,
    }
}

/// Normalizes `0x` hex to lowercase; rejects odd lengths and non-hex digits.
pub fn parse_bytes(s: &str) -> Option<String> {
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", hex.to_ascii_lowercase()))
}
