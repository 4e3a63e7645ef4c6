//! SQL query builder for entity tables
//!
//! Builds parameterized SELECT statements from a descriptor, a compiled
//! filter, an ordering and a window. All values travel as bind parameters;
//! identifiers come only from the validated mapper.

use super::mapper::{ColumnSpec, EntityTypeDescriptor};
use super::pagination::{OrderSpec, Window};
use super::values::SqlValue;
use crate::services::graphql::filters::{FilterNode, Literal};

/// Name of the per-partition row number in windowed relation queries.
pub const RANK_COLUMN: &str = "__rank";

/// Collects bind values and hands out numbered placeholders.
#[derive(Debug, Default)]
pub struct SqlParams {
    values: Vec<SqlValue>,
}

impl SqlParams {
    /// Register a value, returning its `?N` placeholder.
    pub fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("?{}", self.values.len())
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// A ready-to-run statement plus how to decode its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub columns: Vec<ColumnSpec>,
}

/// A query builder over one entity table.
pub struct EntityQuery<'a> {
    entity: &'a EntityTypeDescriptor,
    filter: FilterNode,
    order: Option<OrderSpec>,
    window: Option<Window>,
}

impl<'a> EntityQuery<'a> {
    pub fn new(entity: &'a EntityTypeDescriptor) -> Self {
        Self {
            entity,
            filter: FilterNode::always(),
            order: None,
            window: None,
        }
    }

    /// AND a compiled filter into the query.
    pub fn filter(mut self, filter: FilterNode) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    /// Restrict `column` to one of `keys`.
    pub fn where_in(self, column: &str, keys: &[String]) -> Self {
        self.filter(FilterNode::List {
            column: column.to_string(),
            negated: false,
            values: keys.iter().cloned().map(Literal::Text).collect(),
        })
    }

    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.order = Some(order);
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }

    fn select_list(columns: &[ColumnSpec]) -> String {
        columns
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Plain `SELECT ... [WHERE] ORDER BY ... [LIMIT/OFFSET]`.
    pub fn build(self) -> SqlStatement {
        let columns = self.entity.columns();
        let mut params = SqlParams::default();
        let mut sql = format!(
            "SELECT {} FROM \"{}\"",
            Self::select_list(&columns),
            self.entity.table
        );

        if !self.filter.is_always() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter.to_sql(&mut params));
        }

        let order = self
            .order
            .unwrap_or_else(|| OrderSpec::by_id(self.entity));
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.to_sql());

        if let Some(window) = self.window {
            let limit = params.push(SqlValue::Int(window.first));
            let offset = params.push(SqlValue::Int(window.skip));
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
        }

        SqlStatement {
            sql,
            params: params.into_values(),
            columns,
        }
    }

    /// One query serving many parents: rows whose `partition` column is in
    /// `keys`, numbered per partition in the requested order, then cut to the
    /// window independently within each partition.
    pub fn build_partitioned(self, partition: &str, keys: &[String]) -> SqlStatement {
        let columns = self.entity.columns();
        let select_list = Self::select_list(&columns);
        let order = self
            .order
            .clone()
            .unwrap_or_else(|| OrderSpec::by_id(self.entity));
        let window = self.window;
        let table = self.entity.table.clone();
        let query = self.where_in(partition, keys);

        let mut params = SqlParams::default();
        let predicate = query.filter.to_sql(&mut params);

        let mut sql = format!(
            "SELECT {select_list} FROM (SELECT {select_list}, ROW_NUMBER() OVER (PARTITION BY \"{partition}\" ORDER BY {order}) AS \"{RANK_COLUMN}\" FROM \"{table}\" WHERE {predicate})",
            order = order.to_sql(),
        );

        if let Some(window) = window {
            let skip = params.push(SqlValue::Int(window.skip));
            let end = params.push(SqlValue::Int(window.end()));
            sql.push_str(&format!(
                " WHERE \"{RANK_COLUMN}\" > {skip} AND \"{RANK_COLUMN}\" <= {end}"
            ));
        }
        sql.push_str(&format!(" ORDER BY \"{partition}\", \"{RANK_COLUMN}\""));

        SqlStatement {
            sql,
            params: params.into_values(),
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::services::graphql::entities;
    use crate::services::graphql::orm::mapper::SchemaMapper;

    #[test]
    fn test_params_are_numbered() {
        let mut params = SqlParams::default();
        assert_eq!(params.push(SqlValue::Int(1)), "?1");
        assert_eq!(params.push(SqlValue::Bool(true)), "?2");
        assert_eq!(params.into_values().len(), 2);
    }

    #[test]
    fn test_build_list_query() {
        let mapper = SchemaMapper::build(entities::definitions()).unwrap();
        let account = mapper.describe("Account").unwrap();
        let statement = EntityQuery::new(account)
            .window(Window { first: 10, skip: 20 })
            .build();
        assert_eq!(
            statement.sql,
            "SELECT \"id\" FROM \"accounts\" ORDER BY \"id\" ASC LIMIT ?1 OFFSET ?2"
        );
        assert_eq!(statement.params, vec![SqlValue::Int(10), SqlValue::Int(20)]);
    }

    #[test]
    fn test_build_by_id() {
        let mapper = SchemaMapper::build(entities::definitions()).unwrap();
        let account = mapper.describe("Account").unwrap();
        let statement = EntityQuery::new(account)
            .where_in("id", &["0xabc".to_string()])
            .build();
        assert_eq!(
            statement.sql,
            "SELECT \"id\" FROM \"accounts\" WHERE \"id\" IN (?1) ORDER BY \"id\" ASC"
        );
    }

    #[test]
    fn test_build_partitioned() {
        let mapper = SchemaMapper::build(entities::definitions()).unwrap();
        let registration = mapper.describe("Registration").unwrap();
        let statement = EntityQuery::new(registration)
            .window(Window { first: 2, skip: 1 })
            .build_partitioned("registrant_id", &["0x1".to_string(), "0x2".to_string()]);

        assert!(statement.sql.contains(
            "ROW_NUMBER() OVER (PARTITION BY \"registrant_id\" ORDER BY \"id\" ASC) AS \"__rank\""
        ));
        assert!(statement.sql.contains("WHERE \"registrant_id\" IN (?1, ?2))"));
        assert!(statement.sql.ends_with(
            "WHERE \"__rank\" > ?3 AND \"__rank\" <= ?4 ORDER BY \"registrant_id\", \"__rank\""
        ));
        assert_eq!(statement.params[2], SqlValue::Int(1));
        assert_eq!(statement.params[3], SqlValue::Int(3));
    }
}
