//! Dynamic GraphQL schema in the legacy subgraph shape
//!
//! Generated from the mapper: per entity an object type, a `<Entity>_filter`
//! input, a `<Entity>_orderBy` enum, and the `<entity>(id)` / `<entities>(...)`
//! root fields. Field resolvers read [EntityRow]s passed down as parent values.
//! A failing resolver nulls its own field, or records the nearest nullable
//! ancestor when the field is non-null.

use std::sync::Arc;

use async_graphql::dynamic::{
    Enum, Field, FieldFuture, FieldValue, InputObject, InputValue, Object, ResolverContext,
    Scalar, Schema, TypeRef,
};
use async_graphql::extensions::Tracing;
use async_graphql::{ErrorExtensions, PathSegment, QueryPathSegment};

use super::errors::ConfigurationError;
use super::orm::mapper::PRIMARY_KEY;
use super::orm::{
    ColumnValue, EntityRow, EntityTypeDescriptor, PaginationLimits, RelationDescriptor,
    RelationKind, ScalarKind, SchemaMapper,
};
use super::propagation::NullTarget;
use super::resolvers::{EntityResolver, ListArguments, QueryPlan, RequestScope, ResolverRegistry};

pub type SubgraphSchema = Schema;

const ORDER_DIRECTION: &str = "OrderDirection";

fn filter_type(entity: &str) -> String {
    format!("{}_filter", entity)
}

fn order_by_type(entity: &str) -> String {
    format!("{}_orderBy", entity)
}

/// GraphQL type of a scalar field.
fn scalar_type(name: &str, kind: ScalarKind) -> &'static str {
    if name == PRIMARY_KEY {
        TypeRef::ID
    } else {
        kind.graphql_type()
    }
}

/// Build the executable schema for every mapped entity.
pub fn build_schema(
    mapper: Arc<SchemaMapper>,
    limits: PaginationLimits,
) -> Result<SubgraphSchema, ConfigurationError> {
    let registry = ResolverRegistry::from_mapper(mapper.clone(), limits);

    let mut query = Object::new("Query");
    let mut types = Vec::new();
    let mut inputs = Vec::new();
    let mut enums = vec![Enum::new(ORDER_DIRECTION).item("asc").item("desc")];

    for entity in mapper.entities() {
        types.push(entity_object(entity, &registry));
        inputs.push(filter_input(entity));
        enums.push(order_by_enum(entity));
        query = query
            .field(single_field(entity, &registry)?)
            .field(list_field(entity, &registry, limits)?);
    }

    let mut schema = Schema::build("Query", None, None)
        .extension(Tracing)
        .register(query)
        .register(Scalar::new("BigInt").description("Unsigned integer as a decimal string"))
        .register(Scalar::new("Bytes").description("0x-prefixed hex bytes"));
    for object in types {
        schema = schema.register(object);
    }
    for input in inputs {
        schema = schema.register(input);
    }
    for item in enums {
        schema = schema.register(item);
    }

    schema
        .finish()
        .map_err(|e| ConfigurationError::Schema(e.to_string()))
}

fn entity_object(entity: &EntityTypeDescriptor, registry: &ResolverRegistry) -> Object {
    let mut object = Object::new(&entity.name);

    for field in &entity.fields {
        let graphql_type = scalar_type(&field.name, field.kind);
        let nullable = field.nullable;
        let ty = if nullable {
            TypeRef::named(graphql_type)
        } else {
            TypeRef::named_nn(graphql_type)
        };
        let column = field.column.clone();
        object = object.field(Field::new(&field.name, ty, move |ctx| {
            let column = column.clone();
            FieldFuture::new(async move {
                let result = ctx
                    .parent_value
                    .try_downcast_ref::<Node>()
                    .map(|node| node.row.get(&column).and_then(ColumnValue::to_graphql))
                    .map(|value| value.map(FieldValue::value));
                Ok(settle(&ctx, nullable, result))
            })
        }));
    }

    for relation in &entity.relations {
        object = object.field(relation_field(entity, relation, registry));
    }
    object
}

/// Parent value of entity fields.
///
/// Carries the position a failed non-null field beneath it must null out:
/// the nearest nullable field above, or `None` for the whole `data` object.
struct Node {
    row: EntityRow,
    null_target: NullTarget,
}

impl Node {
    fn value<'v>(row: EntityRow, null_target: NullTarget) -> FieldValue<'v> {
        FieldValue::owned_any(Node { row, null_target })
    }
}

/// Response path of the field being resolved.
fn field_path(ctx: &ResolverContext<'_>) -> Vec<PathSegment> {
    let mut path = Vec::new();
    let mut node = ctx.path_node.as_ref();
    while let Some(current) = node {
        path.push(match current.segment {
            QueryPathSegment::Name(name) => PathSegment::Field(name.to_string()),
            QueryPathSegment::Index(index) => PathSegment::Index(index),
        });
        node = current.parent;
    }
    path.reverse();
    path
}

fn parent_target(ctx: &ResolverContext<'_>) -> NullTarget {
    ctx.parent_value
        .try_downcast_ref::<Node>()
        .ok()
        .and_then(|node| node.null_target.clone())
}

/// Null target handed to rows resolved by this field.
fn child_target(ctx: &ResolverContext<'_>, nullable: bool) -> NullTarget {
    if nullable {
        Some(field_path(ctx))
    } else {
        parent_target(ctx)
    }
}

/// Report a failed field at its own path and resolve it to null.
///
/// A non-null field cannot hold that null, so its nearest nullable ancestor is
/// recorded and nulled once execution finishes.
fn settle<'v>(
    ctx: &ResolverContext<'_>,
    nullable: bool,
    result: async_graphql::Result<Option<FieldValue<'v>>>,
) -> Option<FieldValue<'v>> {
    match result {
        Ok(value) => value,
        Err(error) => {
            let mut error = error.into_server_error(ctx.item.pos);
            error.path = field_path(ctx);
            if !nullable && let Ok(scope) = ctx.data::<RequestScope>() {
                scope.null_targets.push(parent_target(ctx));
            }
            ctx.add_error(error);
            None
        }
    }
}

fn relation_field(
    entity: &EntityTypeDescriptor,
    relation: &RelationDescriptor,
    registry: &ResolverRegistry,
) -> Field {
    let to_many = relation.kind == RelationKind::ToMany;
    let nullable = !to_many && relation.nullable;
    let ty = if to_many {
        TypeRef::named_nn_list_nn(&relation.target)
    } else if nullable {
        TypeRef::named(&relation.target)
    } else {
        TypeRef::named_nn(&relation.target)
    };
    let registry = registry.clone();
    let entity_name = entity.name.clone();
    let relation_name = relation.name.clone();

    let field = Field::new(&relation.name, ty, move |ctx| {
        let registry = registry.clone();
        let entity_name = entity_name.clone();
        let relation_name = relation_name.clone();
        FieldFuture::new(async move {
            let result =
                resolve_relation(&ctx, &registry, &entity_name, &relation_name, to_many, nullable)
                    .await;
            Ok(settle(&ctx, nullable, result))
        })
    });

    if to_many {
        with_list_arguments(field, &relation.target)
    } else {
        field
    }
}

async fn resolve_relation<'v>(
    ctx: &ResolverContext<'_>,
    registry: &ResolverRegistry,
    entity_name: &str,
    relation_name: &str,
    to_many: bool,
    nullable: bool,
) -> async_graphql::Result<Option<FieldValue<'v>>> {
    let scope = ctx.data::<RequestScope>()?;
    let parent = ctx.parent_value.try_downcast_ref::<Node>()?;
    let resolver = registry.get(entity_name).map_err(|e| e.extend())?;
    let args = ListArguments::from_map(ctx.args.as_index_map()).map_err(|e| e.extend())?;
    let rows = resolver
        .resolve_relation(scope, &parent.row, relation_name, &args)
        .await
        .map_err(|e| e.extend())?;

    let target = child_target(ctx, nullable);
    if to_many {
        Ok(Some(FieldValue::list(
            rows.iter()
                .cloned()
                .map(|row| Node::value(row, target.clone())),
        )))
    } else {
        Ok(rows.first().cloned().map(|row| Node::value(row, target)))
    }
}

fn with_list_arguments(field: Field, target: &str) -> Field {
    field
        .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
        .argument(InputValue::new("skip", TypeRef::named(TypeRef::INT)))
        .argument(InputValue::new("orderBy", TypeRef::named(order_by_type(target))))
        .argument(InputValue::new("orderDirection", TypeRef::named(ORDER_DIRECTION)))
        .argument(InputValue::new("where", TypeRef::named(filter_type(target))))
}

fn filter_input(entity: &EntityTypeDescriptor) -> InputObject {
    let name = filter_type(&entity.name);
    let mut input = InputObject::new(&name);

    for (key, target, op) in entity.filter_keys() {
        let graphql_type = scalar_type(target.field, target.kind);
        // relation references filter by the referenced id
        let graphql_type = if target.is_id && target.field != PRIMARY_KEY {
            TypeRef::STRING
        } else {
            graphql_type
        };
        let ty = if op.is_list() {
            TypeRef::named_nn_list(graphql_type)
        } else {
            TypeRef::named(graphql_type)
        };
        input = input.field(InputValue::new(key, ty));
    }

    input
        .field(InputValue::new("and", TypeRef::named_list(&name)))
        .field(InputValue::new("or", TypeRef::named_list(&name)))
}

fn order_by_enum(entity: &EntityTypeDescriptor) -> Enum {
    entity
        .fields
        .iter()
        .fold(Enum::new(order_by_type(&entity.name)), |e, field| {
            e.item(field.name.as_str())
        })
}

fn single_field(
    entity: &Arc<EntityTypeDescriptor>,
    registry: &ResolverRegistry,
) -> Result<Field, ConfigurationError> {
    let resolver = registry
        .get(&entity.name)
        .map_err(|e| ConfigurationError::Schema(e.to_string()))?;

    Ok(Field::new(
        &entity.singular,
        TypeRef::named(&entity.name),
        move |ctx| {
            let resolver = resolver.clone();
            FieldFuture::new(async move {
                let result = resolve_single(&ctx, resolver.as_ref()).await;
                Ok(settle(&ctx, true, result))
            })
        },
    )
    .argument(InputValue::new("id", TypeRef::named_nn(TypeRef::ID))))
}

async fn resolve_single<'v>(
    ctx: &ResolverContext<'_>,
    resolver: &dyn EntityResolver,
) -> async_graphql::Result<Option<FieldValue<'v>>> {
    let scope = ctx.data::<RequestScope>()?;
    let id = ctx.args.try_get("id")?.string()?;
    let row = resolver
        .resolve_one(scope, id)
        .await
        .map_err(|e| e.extend())?;
    let target = child_target(ctx, true);
    Ok(row.map(|row| Node::value(row, target)))
}

fn list_field(
    entity: &Arc<EntityTypeDescriptor>,
    registry: &ResolverRegistry,
    limits: PaginationLimits,
) -> Result<Field, ConfigurationError> {
    let resolver = registry
        .get(&entity.name)
        .map_err(|e| ConfigurationError::Schema(e.to_string()))?;

    let field = Field::new(
        &entity.plural,
        TypeRef::named_nn_list_nn(&entity.name),
        move |ctx| {
            let resolver = resolver.clone();
            FieldFuture::new(async move {
                let result = resolve_list(&ctx, resolver.as_ref(), &limits).await;
                Ok(settle(&ctx, false, result))
            })
        },
    );
    Ok(with_list_arguments(field, &entity.name))
}

async fn resolve_list<'v>(
    ctx: &ResolverContext<'_>,
    resolver: &dyn EntityResolver,
    limits: &PaginationLimits,
) -> async_graphql::Result<Option<FieldValue<'v>>> {
    let scope = ctx.data::<RequestScope>()?;
    let args = ListArguments::from_map(ctx.args.as_index_map()).map_err(|e| e.extend())?;
    let plan =
        QueryPlan::new(resolver.entity().clone(), &args, limits).map_err(|e| e.extend())?;
    let rows = resolver
        .resolve_many(scope, &plan)
        .await
        .map_err(|e| e.extend())?;
    let target = child_target(ctx, false);
    Ok(Some(FieldValue::list(
        rows.into_iter().map(|row| Node::value(row, target.clone())),
    )))
}
