//! Insert/update protocol.
//!
//! Payloads arrive either nested (a relation field carrying the target
//! record inline) or normalized (a relation field carrying the target's
//! identity). Each directive is resolved against the schema before any
//! mutation happens, so a bad directive rejects cleanly and the graph
//! stays exactly as the previous directive left it.

use crate::{
    compute,
    error::StoreError,
    event::StoreEvent,
    identity::Identity,
    relation,
    store::{Record, Store},
};
use relic_schema::{
    builder::{EntityType, ResolvedFieldKind, Schema},
    types::{Cardinality, EntityId, FieldId},
    value::Value,
};
use thiserror::Error as ThisError;

const COMMANDS: [&str; 4] = ["insert", "insert-and-unlink", "unlink", "delete"];

///
/// RecordPayload
///
/// One record's worth of incoming data: the entity type, plus fields in
/// arrival order. Fields absent from the payload are never touched on
/// an existing record (merge semantics).
///

#[derive(Clone, Debug)]
pub struct RecordPayload {
    pub(crate) entity: String,
    pub(crate) fields: Vec<(String, FieldPayload)>,
}

impl RecordPayload {
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: Vec::new(),
        }
    }

    /// Attribute value, or a relation reference by identity.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields
            .push((name.into(), FieldPayload::Value(value.into())));
        self
    }

    /// Nested payload for a single-valued relation.
    #[must_use]
    pub fn one(mut self, name: impl Into<String>, payload: Self) -> Self {
        self.fields.push((name.into(), FieldPayload::One(payload)));
        self
    }

    /// Nested payloads replacing a collection relation wholesale.
    #[must_use]
    pub fn many(mut self, name: impl Into<String>, payloads: Vec<Self>) -> Self {
        self.fields.push((name.into(), FieldPayload::Many(payloads)));
        self
    }

    /// Incremental directives against a collection relation.
    #[must_use]
    pub fn ops(mut self, name: impl Into<String>, ops: Vec<RelationOp>) -> Self {
        self.fields.push((name.into(), FieldPayload::Ops(ops)));
        self
    }

    /// Parse a JSON object into a payload, classifying each key by the
    /// schema: relation values may be nested objects, identity
    /// references, or `[command, data]` directive lists.
    pub fn from_json(
        schema: &Schema,
        entity: &str,
        json: &serde_json::Value,
    ) -> Result<Self, StoreError> {
        let entity_type = schema
            .entity_named(entity)
            .ok_or_else(|| StoreError::unknown_entity(entity))?;

        let serde_json::Value::Object(map) = json else {
            return Err(StoreError::payload_shape(format!(
                "payload for entity '{entity}' must be a JSON object"
            )));
        };

        let mut fields = Vec::new();
        for (key, value) in map {
            let Some((_, descriptor)) = entity_type.field_named(key) else {
                return Err(StoreError::unknown_field(entity, key));
            };

            let field_payload = match &descriptor.kind {
                ResolvedFieldKind::Attribute { .. } => {
                    FieldPayload::Value(Value::from_json(value.clone()))
                }
                ResolvedFieldKind::Relation { target, .. } => {
                    parse_relation_json(schema, &schema.entity(*target).name, value)?
                }
            };
            fields.push((key.clone(), field_payload));
        }

        Ok(Self {
            entity: entity.to_string(),
            fields,
        })
    }
}

fn parse_relation_json(
    schema: &Schema,
    target: &str,
    json: &serde_json::Value,
) -> Result<FieldPayload, StoreError> {
    match json {
        serde_json::Value::Object(_) => Ok(FieldPayload::One(RecordPayload::from_json(
            schema, target, json,
        )?)),
        serde_json::Value::Array(items) => {
            if items.is_empty() {
                return Ok(FieldPayload::Many(Vec::new()));
            }
            if items.iter().all(is_directive) {
                let ops = items
                    .iter()
                    .map(|item| parse_directive(schema, target, item))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(FieldPayload::Ops(ops));
            }
            if items.iter().all(serde_json::Value::is_object) {
                let payloads = items
                    .iter()
                    .map(|item| RecordPayload::from_json(schema, target, item))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(FieldPayload::Many(payloads));
            }

            // list of identity references
            Ok(FieldPayload::Value(Value::from_json(json.clone())))
        }
        _ => Ok(FieldPayload::Value(Value::from_json(json.clone()))),
    }
}

fn is_directive(json: &serde_json::Value) -> bool {
    match json {
        serde_json::Value::Array(pair) => match pair.as_slice() {
            [serde_json::Value::String(command), _] => COMMANDS.contains(&command.as_str()),
            _ => false,
        },
        _ => false,
    }
}

fn parse_directive(
    schema: &Schema,
    target: &str,
    json: &serde_json::Value,
) -> Result<RelationOp, StoreError> {
    let serde_json::Value::Array(pair) = json else {
        return Err(StoreError::payload_shape("directive must be [command, data]"));
    };
    let [serde_json::Value::String(command), data] = pair.as_slice() else {
        return Err(StoreError::payload_shape("directive must be [command, data]"));
    };

    let payload = RecordPayload::from_json(schema, target, data)?;
    match command.as_str() {
        "insert" => Ok(RelationOp::Insert(payload)),
        "insert-and-unlink" => Ok(RelationOp::InsertAndUnlink(payload)),
        "unlink" => Ok(RelationOp::Unlink(payload)),
        "delete" => Ok(RelationOp::Delete(payload)),
        other => Err(StoreError::payload_shape(format!(
            "unknown directive command '{other}'"
        ))),
    }
}

///
/// FieldPayload
///

#[derive(Clone, Debug)]
pub enum FieldPayload {
    /// An attribute value. On a relation field: `Null` clears, a scalar
    /// or list is an identity reference to the target.
    Value(Value),

    /// Nested upsert for a single-valued relation.
    One(RecordPayload),

    /// Nested upserts replacing a collection wholesale.
    Many(Vec<RecordPayload>),

    /// Incremental collection directives, applied in order.
    Ops(Vec<RelationOp>),
}

///
/// RelationOp
///
/// One `[command, data]` directive against a collection context.
///

#[derive(Clone, Debug)]
pub enum RelationOp {
    /// Upsert the target and link it into the collection.
    Insert(RecordPayload),

    /// Upsert the target, then remove it from this collection.
    InsertAndUnlink(RecordPayload),

    /// Remove the target from this collection; the record survives.
    Unlink(RecordPayload),

    /// Delete the target record outright.
    Delete(RecordPayload),
}

///
/// Batch
///
/// An ordered list of top-level directives applied as one notification
/// unit. A failing directive stops the batch; directives before it
/// stay applied, directives after it never run.
///

#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub(crate) directives: Vec<BatchOp>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn insert(mut self, payload: RecordPayload) -> Self {
        self.directives.push(BatchOp::Insert(payload));
        self
    }

    #[must_use]
    pub fn delete(mut self, entity: impl Into<String>, identity: impl Into<Identity>) -> Self {
        self.directives.push(BatchOp::Delete {
            entity: entity.into(),
            identity: identity.into(),
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

///
/// BatchOp
///

#[derive(Clone, Debug)]
pub enum BatchOp {
    Insert(RecordPayload),
    Delete { entity: String, identity: Identity },
}

impl BatchOp {
    fn entity(&self) -> &str {
        match self {
            Self::Insert(payload) => &payload.entity,
            Self::Delete { entity, .. } => entity,
        }
    }
}

///
/// BatchError
///

#[derive(Clone, Debug, ThisError)]
#[error("directive {index} for entity '{entity}' failed: {source}")]
pub struct BatchError {
    pub index: usize,
    pub entity: String,
    #[source]
    pub source: StoreError,
}

impl Store {
    /// Apply one insert payload: upsert by identity, merge fields, wire
    /// relations. Observers are notified once, after the whole payload
    /// (including nested upserts) is applied.
    pub fn insert(&self, payload: &RecordPayload) -> Result<Record, StoreError> {
        self.batch(|| {
            resolve(self, payload)?;
            commit(self, payload)
        })
    }

    /// Apply a batch of directives in order as one notification unit.
    /// Each directive is all-or-nothing: it resolves fully before it
    /// mutates, so a failure leaves the graph as the previous directive
    /// left it.
    pub fn apply(&self, batch: &Batch) -> Result<Vec<Record>, BatchError> {
        self.batch(|| {
            let mut inserted = Vec::new();

            for (index, directive) in batch.directives.iter().enumerate() {
                let result = match directive {
                    BatchOp::Insert(payload) => resolve(self, payload)
                        .and_then(|()| commit(self, payload))
                        .map(|record| inserted.push(record)),
                    BatchOp::Delete { entity, identity } => self
                        .lookup(entity, identity.clone())
                        .and_then(|found| found.map_or(Ok(()), |record| record.delete())),
                };

                if let Err(source) = result {
                    return Err(BatchError {
                        index,
                        entity: directive.entity().to_string(),
                        source,
                    });
                }
            }

            self.emit(&StoreEvent::BatchApplied {
                directives: batch.directives.len(),
            });

            Ok(inserted)
        })
    }
}

//
// resolve phase: validate a payload tree against the schema without
// touching the graph
//

fn resolve(store: &Store, payload: &RecordPayload) -> Result<(), StoreError> {
    let entity = store.entity_named(&payload.entity)?;
    extract_identity(entity, payload)?;

    let mut seen = std::collections::BTreeSet::new();
    for (name, field_payload) in &payload.fields {
        let Some((_, descriptor)) = entity.field_named(name) else {
            return Err(StoreError::unknown_field(&entity.name, name));
        };
        if !seen.insert(name.as_str()) {
            return Err(StoreError::payload_shape(format!(
                "payload for entity '{0}' names field '{name}' more than once",
                entity.name
            )));
        }

        match &descriptor.kind {
            ResolvedFieldKind::Attribute {
                compute: Some(_), ..
            } => return Err(StoreError::computed_read_only(&entity.name, name)),
            ResolvedFieldKind::Attribute { .. } => {
                if !matches!(field_payload, FieldPayload::Value(_)) {
                    return Err(StoreError::field_shape(&entity.name, name, "a plain value"));
                }
            }
            ResolvedFieldKind::Relation {
                target,
                cardinality,
                ..
            } => resolve_relation(store, entity, name, *target, *cardinality, field_payload)?,
        }
    }

    Ok(())
}

fn resolve_relation(
    store: &Store,
    entity: &EntityType,
    name: &str,
    target: EntityId,
    cardinality: Cardinality,
    payload: &FieldPayload,
) -> Result<(), StoreError> {
    let target_type = store.entity(target);

    match (payload, cardinality) {
        (FieldPayload::Value(Value::Null), _) => Ok(()),
        (FieldPayload::Value(value), Cardinality::One) => {
            reference_identity(target_type, value).map(|_| ())
        }
        (FieldPayload::Value(Value::List(items)), Cardinality::Many) => {
            for item in items {
                reference_identity(target_type, item)?;
            }
            Ok(())
        }
        (FieldPayload::Value(_), Cardinality::Many) => Err(StoreError::field_shape(
            &entity.name,
            name,
            "a list of references",
        )),
        (FieldPayload::One(nested), Cardinality::One) => {
            check_target_entity(entity, name, target_type, nested)?;
            resolve(store, nested)
        }
        (FieldPayload::One(_), Cardinality::Many) => Err(StoreError::field_shape(
            &entity.name,
            name,
            "a collection",
        )),
        (FieldPayload::Many(list), Cardinality::Many) => {
            for nested in list {
                check_target_entity(entity, name, target_type, nested)?;
                resolve(store, nested)?;
            }
            Ok(())
        }
        (FieldPayload::Many(_), Cardinality::One) => Err(StoreError::field_shape(
            &entity.name,
            name,
            "a single reference",
        )),
        (FieldPayload::Ops(ops), Cardinality::Many) => {
            for op in ops {
                match op {
                    RelationOp::Insert(nested) | RelationOp::InsertAndUnlink(nested) => {
                        check_target_entity(entity, name, target_type, nested)?;
                        resolve(store, nested)?;
                    }
                    RelationOp::Unlink(nested) | RelationOp::Delete(nested) => {
                        check_target_entity(entity, name, target_type, nested)?;
                        let nested_type = store.entity_named(&nested.entity)?;
                        extract_identity(nested_type, nested).map(|_| ())?;
                    }
                }
            }
            Ok(())
        }
        (FieldPayload::Ops(_), Cardinality::One) => Err(StoreError::field_shape(
            &entity.name,
            name,
            "a collection",
        )),
    }
}

fn check_target_entity(
    entity: &EntityType,
    name: &str,
    target_type: &EntityType,
    nested: &RecordPayload,
) -> Result<(), StoreError> {
    if nested.entity == target_type.name {
        Ok(())
    } else {
        Err(StoreError::relation_target_mismatch(
            &entity.name,
            name,
            &nested.entity,
        ))
    }
}

/// Pull the identity key out of a payload, in declared component order.
fn extract_identity(entity: &EntityType, payload: &RecordPayload) -> Result<Identity, StoreError> {
    let mut components = Vec::with_capacity(entity.identity.len());

    for field_id in &entity.identity {
        let name = &entity.field(*field_id).name;
        let component = payload.fields.iter().find(|(n, _)| n == name);

        match component {
            Some((_, FieldPayload::Value(value))) if !value.is_scalar() => {
                return Err(StoreError::non_scalar_identity(&entity.name, name));
            }
            Some((_, FieldPayload::Value(value))) if *value != Value::Null => {
                components.push(value.clone());
            }
            _ => return Err(StoreError::missing_identity(&entity.name, name)),
        }
    }

    Ok(Identity::new(components))
}

/// Interpret a payload value as a target identity: a scalar for a
/// single-component key, a list of scalars for a composite key. Null
/// is never an identity component, so a null reference fails here
/// instead of minting a record keyed by nothing.
fn reference_identity(target: &EntityType, value: &Value) -> Result<Identity, StoreError> {
    let arity = target.identity.len();

    match value {
        Value::List(items) if items.len() == arity => {
            for (item, field_id) in items.iter().zip(&target.identity) {
                if *item == Value::Null {
                    return Err(StoreError::missing_identity(
                        &target.name,
                        &target.field(*field_id).name,
                    ));
                }
                if !item.is_scalar() {
                    return Err(StoreError::non_scalar_identity(
                        &target.name,
                        &target.field(*field_id).name,
                    ));
                }
            }
            Ok(Identity::new(items.clone()))
        }
        value if value.is_scalar() && *value != Value::Null && arity == 1 => {
            Ok(Identity::new(vec![value.clone()]))
        }
        _ => {
            let name = target
                .identity
                .first()
                .map_or("", |id| target.field(*id).name.as_str());
            Err(StoreError::missing_identity(&target.name, name))
        }
    }
}

//
// commit phase: mutate the graph; resolution already vouched for the
// payload's shape
//

fn commit(store: &Store, payload: &RecordPayload) -> Result<Record, StoreError> {
    let entity = store.entity_named(&payload.entity)?;
    let identity = extract_identity(entity, payload)?;
    let record = store.upsert(&payload.entity, identity)?;

    for (name, field_payload) in &payload.fields {
        let Some((field_id, descriptor)) = entity.field_named(name) else {
            return Err(StoreError::unknown_field(&entity.name, name));
        };

        match &descriptor.kind {
            ResolvedFieldKind::Attribute { .. } => {
                let FieldPayload::Value(value) = field_payload else {
                    return Err(StoreError::field_shape(&entity.name, name, "a plain value"));
                };
                compute::write_attr(store, record.id(), field_id, value.clone())?;
            }
            ResolvedFieldKind::Relation {
                target,
                cardinality,
                required,
                ..
            } => commit_relation(
                store,
                &record,
                field_id,
                *target,
                *cardinality,
                *required,
                field_payload,
            )?,
        }
    }

    Ok(record)
}

fn commit_relation(
    store: &Store,
    record: &Record,
    field: FieldId,
    target: EntityId,
    cardinality: Cardinality,
    required: bool,
    payload: &FieldPayload,
) -> Result<(), StoreError> {
    let target_name = store.entity(target).name.clone();

    match payload {
        FieldPayload::Value(Value::Null) => {
            if required && cardinality == Cardinality::One {
                // Backend races can transiently drop a required target;
                // keep the previous value and signal instead of failing.
                warn_required(store, record, field);
                return Ok(());
            }
            relation::set_relation(store, record.id(), field, Vec::new())
        }
        FieldPayload::Value(value) => match cardinality {
            Cardinality::One => {
                let identity = reference_identity(store.entity(target), value)?;
                let target_record = store.upsert(&target_name, identity)?;
                relation::set_relation(store, record.id(), field, vec![target_record.id()])
            }
            Cardinality::Many => {
                let Value::List(items) = value else {
                    return Err(StoreError::payload_shape("collection reference must be a list"));
                };
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    let identity = reference_identity(store.entity(target), item)?;
                    ids.push(store.upsert(&target_name, identity)?.id());
                }
                relation::set_relation(store, record.id(), field, ids)
            }
        },
        FieldPayload::One(nested) => {
            let target_record = commit(store, nested)?;
            relation::set_relation(store, record.id(), field, vec![target_record.id()])
        }
        FieldPayload::Many(list) => {
            let mut ids = Vec::with_capacity(list.len());
            for nested in list {
                ids.push(commit(store, nested)?.id());
            }
            relation::set_relation(store, record.id(), field, ids)
        }
        FieldPayload::Ops(ops) => {
            for op in ops {
                match op {
                    RelationOp::Insert(nested) => {
                        let target_record = commit(store, nested)?;
                        relation::link(store, record.id(), field, target_record.id())?;
                    }
                    RelationOp::InsertAndUnlink(nested) => {
                        let target_record = commit(store, nested)?;
                        relation::unlink(store, record.id(), field, target_record.id())?;
                    }
                    RelationOp::Unlink(nested) => {
                        if let Some(target_record) = lookup_payload(store, nested)? {
                            relation::unlink(store, record.id(), field, target_record.id())?;
                        }
                    }
                    RelationOp::Delete(nested) => {
                        if let Some(target_record) = lookup_payload(store, nested)? {
                            relation::delete_record(store, target_record.id())?;
                        }
                    }
                }
            }
            Ok(())
        }
    }
}

fn lookup_payload(store: &Store, payload: &RecordPayload) -> Result<Option<Record>, StoreError> {
    let entity = store.entity_named(&payload.entity)?;
    let identity = extract_identity(entity, payload)?;

    store.lookup(&payload.entity, identity)
}

fn warn_required(store: &Store, record: &Record, field: FieldId) {
    let entity = store.entity(record.id().entity);
    store.emit(&StoreEvent::RequiredRelationUnresolved {
        entity: entity.name.clone(),
        identity: record.identity(),
        field: entity.field(field).name.clone(),
    });
}
