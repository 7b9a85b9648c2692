use crate::{
    Error,
    descriptor::{ComputeFn, Field},
    types::{Cardinality, EntityId, FieldId},
    validate::resolve_entities,
    value::Value,
};
use std::{collections::BTreeMap, fmt, sync::Arc};

///
/// EntityFragment
///
/// One ordered contribution to an entity type's field set. Fragments
/// from unrelated modules compose into the full descriptor at build
/// time; exactly one fragment per entity must declare the identity key.
///

#[derive(Debug)]
pub struct EntityFragment {
    pub(crate) entity: String,
    pub(crate) identity: Option<Vec<String>>,
    pub(crate) fields: Vec<Field>,
}

impl EntityFragment {
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            identity: None,
            fields: Vec::new(),
        }
    }

    /// Declare the identity key as an ordered list of attribute names.
    #[must_use]
    pub fn identity<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Contribute one field descriptor.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}

///
/// SchemaBuilder
///
/// Collects fragments in registration order. Forward references are
/// legal: a fragment may relate to an entity registered later; all
/// resolution happens in [`SchemaBuilder::build`].
///

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fragments: Vec<EntityFragment>,
}

impl SchemaBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fragments: Vec::new(),
        }
    }

    #[must_use]
    pub fn fragment(mut self, fragment: EntityFragment) -> Self {
        self.fragments.push(fragment);
        self
    }

    /// Merge fragments, validate the result, and freeze it into an
    /// immutable [`Schema`]. Every violation is reported at once.
    pub fn build(self) -> Result<Schema, Error> {
        let mut order = Vec::new();
        let mut merged: BTreeMap<String, RawEntity> = BTreeMap::new();

        for fragment in self.fragments {
            let entry = merged.entry(fragment.entity.clone()).or_insert_with(|| {
                order.push(fragment.entity.clone());
                RawEntity {
                    name: fragment.entity.clone(),
                    identities: Vec::new(),
                    fields: Vec::new(),
                }
            });

            if let Some(identity) = fragment.identity {
                entry.identities.push(identity);
            }
            entry.fields.extend(fragment.fields);
        }

        let raw = order
            .into_iter()
            .filter_map(|name| merged.remove(&name))
            .collect();

        let entities = resolve_entities(raw).map_err(Error::Validation)?;
        let by_name = entities
            .iter()
            .map(|entity| (entity.name.clone(), entity.id))
            .collect();

        Ok(Schema {
            inner: Arc::new(SchemaInner { entities, by_name }),
        })
    }
}

///
/// RawEntity
/// Merged but unresolved entity declaration handed to validation.
///

#[derive(Debug)]
pub(crate) struct RawEntity {
    pub name: String,
    pub identities: Vec<Vec<String>>,
    pub fields: Vec<Field>,
}

///
/// Schema
///
/// Immutable, cheaply cloneable result of a successful build. Entity and
/// field identifiers are dense indexes assigned in registration order.
///

#[derive(Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

struct SchemaInner {
    entities: Vec<EntityType>,
    by_name: BTreeMap<String, EntityId>,
}

impl Schema {
    #[must_use]
    pub fn entity(&self, id: EntityId) -> &EntityType {
        &self.inner.entities[id.0]
    }

    #[must_use]
    pub fn entity_named(&self, name: &str) -> Option<&EntityType> {
        self.inner
            .by_name
            .get(name)
            .map(|id| &self.inner.entities[id.0])
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.inner.entities.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entities.is_empty()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("entities", &self.inner.entities)
            .finish()
    }
}

///
/// EntityType
///

pub struct EntityType {
    pub id: EntityId,
    pub name: String,

    /// Identity key fields, in declared order.
    pub identity: Vec<FieldId>,

    pub(crate) fields: Vec<ResolvedField>,
    pub(crate) by_name: BTreeMap<String, FieldId>,
}

impl EntityType {
    #[must_use]
    pub fn field(&self, id: FieldId) -> &ResolvedField {
        &self.fields[id.0]
    }

    #[must_use]
    pub fn field_named(&self, name: &str) -> Option<(FieldId, &ResolvedField)> {
        self.by_name.get(name).map(|id| (*id, &self.fields[id.0]))
    }

    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &ResolvedField)> {
        self.fields
            .iter()
            .enumerate()
            .map(|(index, field)| (FieldId(index), field))
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("fields", &self.fields)
            .finish()
    }
}

///
/// ResolvedField
///

pub struct ResolvedField {
    pub name: String,
    pub kind: ResolvedFieldKind,
}

impl ResolvedField {
    #[must_use]
    pub const fn is_relation(&self) -> bool {
        matches!(self.kind, ResolvedFieldKind::Relation { .. })
    }

    #[must_use]
    pub const fn is_computed(&self) -> bool {
        matches!(
            self.kind,
            ResolvedFieldKind::Attribute {
                compute: Some(_),
                ..
            }
        )
    }
}

impl fmt::Debug for ResolvedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedField")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

///
/// ResolvedFieldKind
///
/// Field descriptor with relation targets and inverses resolved to
/// dense identifiers.
///

pub enum ResolvedFieldKind {
    Attribute {
        default: Option<Value>,
        compute: Option<ComputeFn>,
    },
    Relation {
        target: EntityId,
        cardinality: Cardinality,
        inverse: Option<FieldId>,
        required: bool,
    },
}

impl fmt::Debug for ResolvedFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute { default, compute } => f
                .debug_struct("Attribute")
                .field("default", default)
                .field("computed", &compute.is_some())
                .finish(),
            Self::Relation {
                target,
                cardinality,
                inverse,
                required,
            } => f
                .debug_struct("Relation")
                .field("target", target)
                .field("cardinality", cardinality)
                .field("inverse", inverse)
                .field("required", required)
                .finish(),
        }
    }
}
