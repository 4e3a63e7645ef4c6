//! Query planning and entity resolution
//!
//! Root fields resolve through an [EntityResolver] directly against the
//! request's snapshot. Relation fields go through the request's
//! [RelationLoader] so siblings are batched.

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::Value;
use async_trait::async_trait;
use tracing::debug;

use super::errors::{EngineError, ValidationError};
use super::filters::{self, FilterNode, Literal};
use super::loaders::{BatchPlan, EdgeKey, Lookup, RelationLoader};
use super::orm::{
    EntityQuery, EntityRow, EntityTypeDescriptor, ForeignKey, OrderSpec,
    PaginationLimits, RelationDescriptor, RelationKind, ScalarKind, SchemaMapper, Window,
};
use super::propagation::NullTargets;
use crate::db::Snapshot;

/// Per-request resources shared by every resolver of that request.
pub struct RequestScope {
    pub snapshot: Arc<dyn Snapshot>,
    pub loader: Arc<RelationLoader>,
    pub null_targets: Arc<NullTargets>,
}

impl RequestScope {
    pub fn new(snapshot: Arc<dyn Snapshot>) -> Self {
        let loader = RelationLoader::new(snapshot.clone());
        Self {
            snapshot,
            loader,
            null_targets: Arc::default(),
        }
    }
}

/// Raw list arguments (`first`, `skip`, `orderBy`, `orderDirection`, `where`).
#[derive(Debug, Clone, Default)]
pub struct ListArguments {
    pub first: Option<i64>,
    pub skip: Option<i64>,
    pub order_by: Option<String>,
    pub order_direction: Option<String>,
    pub filter: Value,
}

impl ListArguments {
    /// Read list arguments from a field's argument map.
    pub fn from_map(
        args: &async_graphql::indexmap::IndexMap<async_graphql::Name, Value>,
    ) -> Result<Self, ValidationError> {
        let integer = |name: &'static str| -> Result<Option<i64>, ValidationError> {
            match args.get(name) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Number(n)) => n
                    .as_i64()
                    .map(Some)
                    .ok_or(ValidationError::InvalidPaginationArgument { argument: name }),
                Some(_) => Err(ValidationError::InvalidPaginationArgument { argument: name }),
            }
        };
        let name = |key: &str| match args.get(key) {
            Some(Value::Enum(value)) => Some(value.to_string()),
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        Ok(Self {
            first: integer("first")?,
            skip: integer("skip")?,
            order_by: name("orderBy"),
            order_direction: name("orderDirection"),
            filter: args.get("where").cloned().unwrap_or(Value::Null),
        })
    }
}

/// A validated list query for one entity.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub entity: Arc<EntityTypeDescriptor>,
    pub filter: FilterNode,
    pub order: OrderSpec,
    pub window: Window,
}

impl QueryPlan {
    pub fn new(
        entity: Arc<EntityTypeDescriptor>,
        args: &ListArguments,
        limits: &PaginationLimits,
    ) -> Result<Self, ValidationError> {
        let filter = filters::compile(&entity, &args.filter)?;
        let order = OrderSpec::resolve(
            &entity,
            args.order_by.as_deref(),
            args.order_direction.as_deref(),
        )?;
        let window = Window::resolve(args.first, args.skip, limits)?;
        Ok(Self {
            entity,
            filter,
            order,
            window,
        })
    }
}

#[async_trait]
pub trait EntityResolver: Send + Sync {
    fn entity(&self) -> &Arc<EntityTypeDescriptor>;

    /// Point lookup. Absence is `Ok(None)`.
    async fn resolve_one(&self, scope: &RequestScope, id: &str) -> Result<Option<EntityRow>, EngineError>;

    async fn resolve_many(&self, scope: &RequestScope, plan: &QueryPlan) -> Result<Vec<EntityRow>, EngineError>;

    /// Rows of `relation` for one parent row, batched with its siblings.
    async fn resolve_relation(
        &self,
        scope: &RequestScope,
        parent: &EntityRow,
        relation: &str,
        args: &ListArguments,
    ) -> Result<Arc<Vec<EntityRow>>, EngineError>;
}

/// Resolver for entities backed by one table.
pub struct TableResolver {
    entity: Arc<EntityTypeDescriptor>,
    mapper: Arc<SchemaMapper>,
    limits: PaginationLimits,
}

impl TableResolver {
    pub fn new(entity: Arc<EntityTypeDescriptor>, mapper: Arc<SchemaMapper>, limits: PaginationLimits) -> Self {
        Self {
            entity,
            mapper,
            limits,
        }
    }

    fn target(&self, relation: &RelationDescriptor) -> Result<Arc<EntityTypeDescriptor>, ValidationError> {
        self.mapper
            .descriptor(&relation.target)
            .ok_or_else(|| ValidationError::UnknownEntity(relation.target.clone()))
    }
}

#[async_trait]
impl EntityResolver for TableResolver {
    fn entity(&self) -> &Arc<EntityTypeDescriptor> {
        &self.entity
    }

    async fn resolve_one(&self, scope: &RequestScope, id: &str) -> Result<Option<EntityRow>, EngineError> {
        let statement = EntityQuery::new(&self.entity)
            .filter(FilterNode::Compare {
                column: self.entity.id_column().to_string(),
                kind: ScalarKind::String,
                op: filters::FilterOp::Eq,
                value: Literal::Text(id.to_string()),
            })
            .window(Window { first: 1, skip: 0 })
            .build();
        let rows = scope.snapshot.fetch(&statement).await?;
        Ok(rows.into_iter().next())
    }

    async fn resolve_many(&self, scope: &RequestScope, plan: &QueryPlan) -> Result<Vec<EntityRow>, EngineError> {
        debug!(
            entity = %plan.entity.name,
            first = plan.window.first,
            skip = plan.window.skip,
            "Resolving list"
        );
        let statement = EntityQuery::new(&plan.entity)
            .filter(plan.filter.clone())
            .order_by(plan.order.clone())
            .window(plan.window)
            .build();
        Ok(scope.snapshot.fetch(&statement).await?)
    }

    async fn resolve_relation(
        &self,
        scope: &RequestScope,
        parent: &EntityRow,
        relation: &str,
        args: &ListArguments,
    ) -> Result<Arc<Vec<EntityRow>>, EngineError> {
        let descriptor = self
            .entity
            .relation(relation)
            .ok_or_else(|| ValidationError::UnknownField {
                entity: self.entity.name.clone(),
                field: relation.to_string(),
            })?;
        let target = self.target(descriptor)?;
        let edge = EdgeKey::new(&self.entity.name, &descriptor.name);

        let (edge, key, plan) = match (&descriptor.kind, &descriptor.foreign_key) {
            (_, ForeignKey::Parent(column)) => {
                // null reference: nothing to fetch
                let Some(key) = parent.text(column) else {
                    return Ok(Arc::new(Vec::new()));
                };
                (edge, key.to_string(), BatchPlan::by_id(target))
            }
            (RelationKind::ToOne, ForeignKey::Target(column)) => {
                let Some(key) = parent.text(self.entity.id_column()) else {
                    return Ok(Arc::new(Vec::new()));
                };
                let plan = BatchPlan {
                    lookup: Lookup::ByColumn(column.clone()),
                    window: Some(Window { first: 1, skip: 0 }),
                    ..BatchPlan::by_id(target)
                };
                (edge, key.to_string(), plan)
            }
            (RelationKind::ToMany, ForeignKey::Target(column)) => {
                let Some(key) = parent.text(self.entity.id_column()) else {
                    return Ok(Arc::new(Vec::new()));
                };
                let planned = QueryPlan::new(target, args, &self.limits)?;
                let fingerprint = format!("{:?}|{:?}|{:?}", planned.filter, planned.order, planned.window);
                let plan = BatchPlan {
                    target: planned.entity,
                    lookup: Lookup::ByColumn(column.clone()),
                    filter: planned.filter,
                    order: planned.order,
                    window: Some(planned.window),
                };
                (edge.with_arguments(fingerprint), key.to_string(), plan)
            }
        };

        Ok(scope.loader.load(&edge, &key, move || plan).await?)
    }
}

/// Resolvers by entity name.
#[derive(Clone)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn EntityResolver>>,
}

impl ResolverRegistry {
    /// One [TableResolver] per mapped entity.
    pub fn from_mapper(mapper: Arc<SchemaMapper>, limits: PaginationLimits) -> Self {
        let resolvers = mapper
            .entities()
            .map(|entity| {
                let resolver: Arc<dyn EntityResolver> =
                    Arc::new(TableResolver::new(entity.clone(), mapper.clone(), limits));
                (entity.name.clone(), resolver)
            })
            .collect();
        Self { resolvers }
    }

    pub fn get(&self, entity: &str) -> Result<Arc<dyn EntityResolver>, ValidationError> {
        self.resolvers
            .get(entity)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownEntity(entity.to_string()))
    }
}
