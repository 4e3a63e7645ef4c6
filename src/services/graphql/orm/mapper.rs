//! Schema type mapper
//!
//! Maps entity and field names of the subgraph schema onto tables and columns,
//! and records the shape of every relation. The mapper is built once at startup
//! from [EntityDef] declarations, validated as a whole, and then shared read-only
//! behind an `Arc` by every request. Any inconsistency is a [ConfigurationError].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::values::ScalarKind;
use crate::services::graphql::errors::{ConfigurationError, ValidationError};
use crate::services::graphql::filters::FilterOp;

/// Field name of every entity's primary identifier.
pub const PRIMARY_KEY: &str = "id";

/// Keys of a `where` object that are not filters on a field.
const RESERVED_NAMES: &[&str] = &["and", "or"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nullability {
    Required,
    Optional,
}

/// A scalar field and the column backing it.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub kind: ScalarKind,
    pub nullable: bool,
    /// Filter operators legal for this field's kind
    pub operators: &'static [FilterOp],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ToOne,
    ToMany,
}

/// Where the foreign key of a relation lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignKey {
    /// Column on this entity's table holding the target's id.
    Parent(String),
    /// Column on the target's table holding this entity's id.
    Target(String),
}

#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
    pub foreign_key: ForeignKey,
    pub target: String,
    pub nullable: bool,
}

impl RelationDescriptor {
    /// FK column on the parent table, for forward references.
    pub fn parent_column(&self) -> Option<&str> {
        match &self.foreign_key {
            ForeignKey::Parent(column) => Some(column),
            ForeignKey::Target(_) => None,
        }
    }
}

/// A column to select together with how to decode it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ScalarKind,
}

/// What a filter key addresses: a scalar field, or the id stored by a forward reference.
#[derive(Debug, Clone, Copy)]
pub struct FilterTarget<'a> {
    pub field: &'a str,
    pub column: &'a str,
    pub kind: ScalarKind,
    pub is_id: bool,
    pub operators: &'static [FilterOp],
}

/// Immutable description of one entity type.
#[derive(Debug, Clone)]
pub struct EntityTypeDescriptor {
    pub name: String,
    /// Root field for lookup by id (e.g. `domain`)
    pub singular: String,
    /// Root field for list queries (e.g. `domains`)
    pub plural: String,
    pub table: String,
    pub fields: Vec<FieldDescriptor>,
    pub relations: Vec<RelationDescriptor>,
}

impl EntityTypeDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Column of the primary identifier.
    pub fn id_column(&self) -> &str {
        self.field(PRIMARY_KEY)
            .map(|f| f.column.as_str())
            .unwrap_or(PRIMARY_KEY)
    }

    /// Every column of the table: scalar fields followed by forward FK columns.
    pub fn columns(&self) -> Vec<ColumnSpec> {
        let mut seen = HashSet::new();
        let scalars = self.fields.iter().map(|f| (f.column.as_str(), f.kind));
        let references = self
            .relations
            .iter()
            .filter_map(|r| r.parent_column())
            .map(|column| (column, ScalarKind::String));

        scalars
            .chain(references)
            .filter(|(column, _)| seen.insert(*column))
            .map(|(column, kind)| ColumnSpec {
                name: column.to_string(),
                kind,
            })
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().iter().any(|c| c.name == column)
    }

    /// Resolve a bare filter key (no operator suffix) to what it filters.
    pub fn filter_target(&self, name: &str) -> Option<FilterTarget<'_>> {
        if let Some(field) = self.field(name) {
            return Some(FilterTarget {
                field: &field.name,
                column: &field.column,
                kind: field.kind,
                is_id: field.name == PRIMARY_KEY,
                operators: field.operators,
            });
        }
        let relation = self.relation(name)?;
        if relation.kind != RelationKind::ToOne {
            return None;
        }
        let column = relation.parent_column()?;
        Some(FilterTarget {
            field: &relation.name,
            column,
            kind: ScalarKind::String,
            is_id: true,
            operators: FilterOp::for_kind(ScalarKind::String),
        })
    }

    /// Split a `where` key such as `name_starts_with_nocase` into target and operator.
    ///
    /// Returns the operator even when it is illegal for the target's kind; callers
    /// check `operators` so the error can name the key.
    pub fn resolve_filter_key(&self, key: &str) -> Option<(FilterTarget<'_>, FilterOp)> {
        if let Some(target) = self.filter_target(key) {
            return Some((target, FilterOp::Eq));
        }
        FilterOp::ALL.iter().find_map(|op| {
            let suffix = op.suffix()?;
            let name = key.strip_suffix(suffix)?.strip_suffix('_')?;
            self.filter_target(name).map(|target| (target, *op))
        })
    }

    /// Every legal filter key with its target and operator, in declaration order.
    pub fn filter_keys(&self) -> Vec<(String, FilterTarget<'_>, FilterOp)> {
        let names = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.relations.iter().map(|r| r.name.as_str()));

        let mut keys = Vec::new();
        for name in names {
            let Some(target) = self.filter_target(name) else {
                continue;
            };
            for op in target.operators {
                keys.push((op.key_for(name), target, *op));
            }
        }
        keys
    }

    /// CREATE TABLE statement matching the descriptor. Used to bootstrap empty stores.
    pub fn create_table_sql(&self) -> String {
        let mut column_defs = Vec::new();
        for field in &self.fields {
            let mut sql = format!("\"{}\" {}", field.column, field.kind.sql_type());
            if field.name == PRIMARY_KEY {
                sql.push_str(" PRIMARY KEY");
            } else if !field.nullable {
                sql.push_str(" NOT NULL");
            }
            column_defs.push(sql);
        }

        let mut seen = HashSet::new();
        for relation in &self.relations {
            let Some(column) = relation.parent_column() else {
                continue;
            };
            if !seen.insert(column) {
                continue;
            }
            let mut sql = format!("\"{}\" TEXT", column);
            if !relation.nullable {
                sql.push_str(" NOT NULL");
            }
            column_defs.push(sql);
        }

        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n  {}\n)",
            self.table,
            column_defs.join(",\n  ")
        )
    }
}

/// Declarative input to [SchemaMapper::build].
#[derive(Debug, Clone)]
pub struct EntityDef {
    name: String,
    table: String,
    plural: Option<String>,
    fields: Vec<FieldDescriptor>,
    relations: Vec<RelationDescriptor>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            plural: None,
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Override the list root field name (defaults to the singular plus `s`).
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        kind: ScalarKind,
        nullability: Nullability,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            column: column.into(),
            kind,
            nullable: nullability == Nullability::Optional,
            operators: FilterOp::for_kind(kind),
        });
        self
    }

    pub fn to_one(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: ForeignKey,
        nullability: Nullability,
    ) -> Self {
        self.relations.push(RelationDescriptor {
            name: name.into(),
            kind: RelationKind::ToOne,
            foreign_key,
            target: target.into(),
            nullable: nullability == Nullability::Optional,
        });
        self
    }

    /// One-to-many relation whose FK column lives on the target table.
    pub fn to_many(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        self.relations.push(RelationDescriptor {
            name: name.into(),
            kind: RelationKind::ToMany,
            foreign_key: ForeignKey::Target(target_column.into()),
            target: target.into(),
            nullable: false,
        });
        self
    }
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Process-wide registry of entity descriptors.
#[derive(Debug)]
pub struct SchemaMapper {
    entities: BTreeMap<String, Arc<EntityTypeDescriptor>>,
}

impl SchemaMapper {
    /// Build and validate the mapping. Fails on any unmapped type, field or relation.
    pub fn build(defs: Vec<EntityDef>) -> Result<Self, ConfigurationError> {
        let mut entities = BTreeMap::new();
        let mut root_fields = HashSet::new();

        for def in defs {
            let singular = lower_first(&def.name);
            let plural = def.plural.unwrap_or_else(|| format!("{}s", singular));
            for root in [&singular, &plural] {
                if !root_fields.insert(root.clone()) {
                    return Err(ConfigurationError::DuplicateRootField {
                        field: root.clone(),
                    });
                }
            }

            let descriptor = EntityTypeDescriptor {
                name: def.name,
                singular,
                plural,
                table: def.table,
                fields: def.fields,
                relations: def.relations,
            };
            validate_entity(&descriptor)?;

            let name = descriptor.name.clone();
            if entities.insert(name.clone(), Arc::new(descriptor)).is_some() {
                return Err(ConfigurationError::DuplicateEntity(name));
            }
        }

        let mapper = Self { entities };
        for descriptor in mapper.entities.values() {
            mapper.validate_relations(descriptor)?;
            validate_filter_keys(descriptor)?;
        }
        Ok(mapper)
    }

    /// Descriptor for an entity type, or a ValidationError naming the unknown type.
    pub fn describe(&self, name: &str) -> Result<&EntityTypeDescriptor, ValidationError> {
        self.entities
            .get(name)
            .map(|d| d.as_ref())
            .ok_or_else(|| ValidationError::UnknownEntity(name.to_string()))
    }

    /// Shared handle to a descriptor, for resolvers that outlive a borrow.
    pub fn descriptor(&self, name: &str) -> Option<Arc<EntityTypeDescriptor>> {
        self.entities.get(name).cloned()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityTypeDescriptor>> {
        self.entities.values()
    }

    fn validate_relations(&self, entity: &EntityTypeDescriptor) -> Result<(), ConfigurationError> {
        for relation in &entity.relations {
            let invalid = |reason: &str| ConfigurationError::InvalidRelation {
                entity: entity.name.clone(),
                relation: relation.name.clone(),
                reason: reason.to_string(),
            };

            let target = self.entities.get(&relation.target).ok_or_else(|| {
                ConfigurationError::UnknownRelationTarget {
                    entity: entity.name.clone(),
                    relation: relation.name.clone(),
                    target: relation.target.clone(),
                }
            })?;

            match (&relation.kind, &relation.foreign_key) {
                (_, ForeignKey::Parent(column)) | (_, ForeignKey::Target(column))
                    if column.is_empty() =>
                {
                    return Err(invalid("foreign key column is empty"));
                }
                (RelationKind::ToMany, ForeignKey::Parent(_)) => {
                    return Err(invalid("to-many relations need the key on the target"));
                }
                (_, ForeignKey::Target(column)) if !target.has_column(column) => {
                    return Err(invalid(&format!(
                        "`{}` has no column for the foreign key",
                        target.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn validate_entity(entity: &EntityTypeDescriptor) -> Result<(), ConfigurationError> {
    if entity.table.is_empty() {
        return Err(ConfigurationError::MissingTable {
            entity: entity.name.clone(),
        });
    }

    let mut names = HashSet::new();
    let all_names = entity
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .chain(entity.relations.iter().map(|r| r.name.as_str()));
    for name in all_names {
        if RESERVED_NAMES.contains(&name) {
            return Err(ConfigurationError::ReservedName {
                entity: entity.name.clone(),
                name: name.to_string(),
            });
        }
        if !names.insert(name) {
            return Err(ConfigurationError::DuplicateField {
                entity: entity.name.clone(),
                field: name.to_string(),
            });
        }
    }

    for field in &entity.fields {
        if field.column.is_empty() {
            return Err(ConfigurationError::MissingColumn {
                entity: entity.name.clone(),
                field: field.name.clone(),
            });
        }
    }

    match entity.field(PRIMARY_KEY) {
        Some(id) if !id.nullable && id.kind == ScalarKind::String => Ok(()),
        _ => Err(ConfigurationError::MissingPrimaryKey {
            entity: entity.name.clone(),
        }),
    }
}

/// Every generated filter key must parse back to the field and operator it came from.
fn validate_filter_keys(entity: &EntityTypeDescriptor) -> Result<(), ConfigurationError> {
    for (key, target, op) in entity.filter_keys() {
        let round_trip = entity
            .resolve_filter_key(&key)
            .map(|(t, o)| (t.field.to_string(), o));
        if round_trip != Some((target.field.to_string(), op)) {
            return Err(ConfigurationError::AmbiguousFilterKey {
                entity: entity.name.clone(),
                key,
            });
        }
    }
    Ok(())
}
