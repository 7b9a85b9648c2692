pub mod record;

pub use record::Record;

use crate::{
    compute,
    error::StoreError,
    event::{EventSink, StoreEvent},
    identity::Identity,
    reactive::{DepKey, ObserverId, Observers, RecordId, Tracker},
};
use relic_schema::{
    builder::{EntityType, ResolvedFieldKind, Schema},
    types::{Cardinality, EntityId, FieldId},
    value::Value,
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

/// Hard ceiling on observer re-run rounds within one flush. A cascade
/// that keeps dirtying its own dependencies past this depth is a
/// feedback loop in user callbacks, not productive work.
const MAX_FLUSH_ROUNDS: usize = 64;

///
/// Store
///
/// One session: an isolated identity registry over a frozen schema,
/// plus the reactive state that tracks reads and batches writes.
/// Cheaply cloneable; clones share the same session.
///

#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Rc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub schema: Schema,
    pub graph: RefCell<Graph>,
    pub tracker: RefCell<Tracker>,
    observers: RefCell<Observers>,
    sink: RefCell<Option<Rc<dyn EventSink>>>,
}

impl Store {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        let graph = Graph::new(&schema);

        Self {
            inner: Rc::new(StoreInner {
                schema,
                graph: RefCell::new(graph),
                tracker: RefCell::new(Tracker::new()),
                observers: RefCell::new(Observers::new()),
                sink: RefCell::new(None),
            }),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Install the session's event sink, replacing any previous one.
    pub fn set_sink(&self, sink: Rc<dyn EventSink>) {
        *self.inner.sink.borrow_mut() = Some(sink);
    }

    pub(crate) fn emit(&self, event: &StoreEvent) {
        let sink = self.inner.sink.borrow().clone();
        if let Some(sink) = sink {
            sink.record(event);
        }
    }

    //
    // registry
    //

    /// Fetch the live record with this identity, or create it with
    /// default field values. Creation counts as a registry write.
    pub fn upsert(&self, entity: &str, identity: impl Into<Identity>) -> Result<Record, StoreError> {
        let entity_type = self.entity_named(entity)?;
        let entity_id = entity_type.id;
        let identity = self.check_identity(entity_type, identity.into())?;

        self.track_read(DepKey::Registry(entity_id));

        let existing = self.inner.graph.borrow().find(entity_id, &identity);
        if let Some(id) = existing {
            return Ok(Record::new(self.clone(), id));
        }

        let id = self.batch(|| {
            let id = self
                .inner
                .graph
                .borrow_mut()
                .create(&self.inner.schema, entity_id, identity);
            self.mark_write(DepKey::Registry(entity_id));
            id
        });

        Ok(Record::new(self.clone(), id))
    }

    /// Fetch without creating. The lookup itself is tracked, so an
    /// observer that saw `None` re-runs once the record appears.
    pub fn lookup(
        &self,
        entity: &str,
        identity: impl Into<Identity>,
    ) -> Result<Option<Record>, StoreError> {
        let entity_type = self.entity_named(entity)?;
        let entity_id = entity_type.id;
        let identity = self.check_identity(entity_type, identity.into())?;

        self.track_read(DepKey::Registry(entity_id));

        let found = self.inner.graph.borrow().find(entity_id, &identity);
        Ok(found.map(|id| Record::new(self.clone(), id)))
    }

    /// All live records of one entity type, in creation order.
    pub fn records(&self, entity: &str) -> Result<Vec<Record>, StoreError> {
        let entity_id = self.entity_named(entity)?.id;
        self.track_read(DepKey::Registry(entity_id));

        let ids = self.inner.graph.borrow().live_records(entity_id);
        Ok(ids.into_iter().map(|id| Record::new(self.clone(), id)).collect())
    }

    /// Live record count for one entity type. Tracked like a lookup.
    pub fn count(&self, entity: &str) -> Result<usize, StoreError> {
        let entity_id = self.entity_named(entity)?.id;
        self.track_read(DepKey::Registry(entity_id));

        Ok(self.inner.graph.borrow().live_count(entity_id))
    }

    //
    // observation
    //

    /// Subscribe a callback: it runs once immediately inside a tracking
    /// scope, then again after any batch that wrote one of the fields it
    /// read during its latest run.
    pub fn observe(&self, mut callback: impl FnMut() + 'static) -> ObserverId {
        self.inner.tracker.borrow_mut().push_scope();
        self.batch(&mut callback);
        let deps = self.inner.tracker.borrow_mut().pop_scope();

        self.inner
            .observers
            .borrow_mut()
            .register(deps, Box::new(callback))
    }

    pub fn unobserve(&self, id: ObserverId) {
        self.inner.observers.borrow_mut().dispose(id);
    }

    //
    // batching
    //

    /// Run `f` as one notification unit: every write inside, however
    /// nested, coalesces into a single observer flush when the outermost
    /// batch scope closes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.tracker.borrow_mut().begin_batch();
        let result = f();

        let flushed = self.inner.tracker.borrow_mut().end_batch();
        if let Some(changed) = flushed {
            self.flush(changed);
        }

        result
    }

    /// Record one write: mark it pending for the current batch and walk
    /// the reverse dependency index, dirtying every computed field that
    /// transitively read this key. Already-dirty fields stop the walk.
    pub(crate) fn mark_write(&self, key: DepKey) {
        let mut tracker = self.inner.tracker.borrow_mut();
        let mut graph = self.inner.graph.borrow_mut();

        let mut queue = vec![key];
        let mut visited = BTreeSet::new();

        while let Some(key) = queue.pop() {
            if !visited.insert(key) {
                continue;
            }
            tracker.mark_pending(key);

            for (record, field) in tracker.dependents_of(key) {
                if graph.mark_dirty(record, field) {
                    queue.push(DepKey::Field(record, field));
                }
            }
        }
    }

    pub(crate) fn mark_writes(&self, keys: impl IntoIterator<Item = DepKey>) {
        for key in keys {
            self.mark_write(key);
        }
    }

    pub(crate) fn track_read(&self, key: DepKey) {
        self.inner.tracker.borrow_mut().track_read(key);
    }

    /// Re-run observers whose dependencies intersect the change set.
    /// Callback writes open a fresh batch whose flush feeds the next
    /// round, so cascading updates settle before control returns.
    fn flush(&self, changed: BTreeSet<DepKey>) {
        let mut changed = changed;
        let mut rounds = 0;

        while !changed.is_empty() && rounds < MAX_FLUSH_ROUNDS {
            rounds += 1;

            let stale = self.inner.observers.borrow().stale(&changed);
            if stale.is_empty() {
                break;
            }

            self.inner.tracker.borrow_mut().begin_batch();
            for id in stale {
                let Some(mut callback) = self.inner.observers.borrow_mut().take_callback(id)
                else {
                    continue;
                };

                self.inner.tracker.borrow_mut().push_scope();
                callback();
                let deps = self.inner.tracker.borrow_mut().pop_scope();

                self.inner.observers.borrow_mut().restore(id, callback, deps);
            }

            changed = self
                .inner
                .tracker
                .borrow_mut()
                .end_batch()
                .unwrap_or_default();
        }
    }

    //
    // schema plumbing
    //

    pub(crate) fn entity_named(&self, name: &str) -> Result<&EntityType, StoreError> {
        self.inner
            .schema
            .entity_named(name)
            .ok_or_else(|| StoreError::unknown_entity(name))
    }

    pub(crate) fn entity(&self, id: EntityId) -> &EntityType {
        self.inner.schema.entity(id)
    }

    /// Validate component count and scalar shape against the entity's
    /// declared identity key.
    fn check_identity(
        &self,
        entity: &EntityType,
        identity: Identity,
    ) -> Result<Identity, StoreError> {
        if identity.len() != entity.identity.len() {
            let field = entity
                .identity
                .get(identity.len())
                .map_or("", |id| entity.field(*id).name.as_str());
            return Err(StoreError::missing_identity(&entity.name, field));
        }

        for (component, field_id) in identity.components().iter().zip(&entity.identity) {
            if *component == Value::Null {
                let field = &entity.field(*field_id).name;
                return Err(StoreError::missing_identity(&entity.name, field));
            }
            if !component.is_scalar() {
                let field = &entity.field(*field_id).name;
                return Err(StoreError::non_scalar_identity(&entity.name, field));
            }
        }

        Ok(identity)
    }

    //
    // field access (delegated to by Record and the apply protocol)
    //

    pub(crate) fn read_field(&self, id: RecordId, field: FieldId) -> Result<Value, StoreError> {
        compute::read_field(self, id, field)
    }

    pub(crate) fn require_live(&self, id: RecordId) -> Result<(), StoreError> {
        if self.inner.graph.borrow().is_live(id) {
            Ok(())
        } else {
            Err(StoreError::dead_record(&self.entity(id.entity).name))
        }
    }
}

///
/// Graph
///
/// The materialized record graph: per-entity tables plus the backref
/// index covering inverse-less relations, so deletion can still honor
/// referential cleanup without scanning every record.
///

pub(crate) struct Graph {
    tables: Vec<EntityTable>,
    backrefs: BTreeMap<RecordId, BTreeSet<(RecordId, FieldId)>>,
}

struct EntityTable {
    records: Vec<RecordData>,
    by_identity: BTreeMap<Identity, u32>,
}

pub(crate) struct RecordData {
    pub identity: Identity,
    pub live: bool,
    pub fields: Vec<FieldSlot>,
}

///
/// FieldSlot
///
/// Runtime storage for one field. The variant is fixed by the schema at
/// record creation and never changes.
///

pub(crate) enum FieldSlot {
    Attr(Value),
    Computed(ComputedSlot),
    One(Option<RecordId>),
    Many(Vec<RecordId>),
}

pub(crate) struct ComputedSlot {
    pub value: Value,
    pub deps: BTreeSet<DepKey>,
    pub clean: bool,
}

impl Graph {
    fn new(schema: &Schema) -> Self {
        Self {
            tables: schema
                .entities()
                .map(|_| EntityTable {
                    records: Vec::new(),
                    by_identity: BTreeMap::new(),
                })
                .collect(),
            backrefs: BTreeMap::new(),
        }
    }

    pub fn find(&self, entity: EntityId, identity: &Identity) -> Option<RecordId> {
        self.tables[entity.0]
            .by_identity
            .get(identity)
            .map(|slot| RecordId {
                entity,
                slot: *slot,
            })
    }

    /// Register a new record with default field values; identity
    /// components are seeded from the key. Slots are append-only; a
    /// deleted record's slot is never reissued.
    pub fn create(&mut self, schema: &Schema, entity: EntityId, identity: Identity) -> RecordId {
        let entity_type = schema.entity(entity);
        let mut fields: Vec<FieldSlot> = entity_type
            .fields()
            .map(|(_, field)| match &field.kind {
                ResolvedFieldKind::Attribute {
                    compute: Some(_), ..
                } => FieldSlot::Computed(ComputedSlot {
                    value: Value::Null,
                    deps: BTreeSet::new(),
                    clean: false,
                }),
                ResolvedFieldKind::Attribute { default, .. } => {
                    FieldSlot::Attr(default.clone().unwrap_or(Value::Null))
                }
                ResolvedFieldKind::Relation {
                    cardinality: Cardinality::One,
                    ..
                } => FieldSlot::One(None),
                ResolvedFieldKind::Relation {
                    cardinality: Cardinality::Many,
                    ..
                } => FieldSlot::Many(Vec::new()),
            })
            .collect();

        for (component, field_id) in identity.components().iter().zip(&entity_type.identity) {
            fields[field_id.0] = FieldSlot::Attr(component.clone());
        }

        let table = &mut self.tables[entity.0];
        let slot = u32::try_from(table.records.len()).unwrap_or(u32::MAX);
        table.records.push(RecordData {
            identity: identity.clone(),
            live: true,
            fields,
        });
        table.by_identity.insert(identity, slot);

        RecordId { entity, slot }
    }

    /// Unregister a record. The slot's data stays behind as a tombstone
    /// so outstanding handles fail with a dead-record error instead of
    /// reading another record's state.
    pub fn remove(&mut self, id: RecordId) {
        let table = &mut self.tables[id.entity.0];
        if let Some(data) = table.records.get_mut(id.slot as usize) {
            data.live = false;
            table.by_identity.remove(&data.identity);
        }
        self.backrefs.remove(&id);
    }

    pub fn is_live(&self, id: RecordId) -> bool {
        self.record(id).is_some_and(|data| data.live)
    }

    pub fn record(&self, id: RecordId) -> Option<&RecordData> {
        self.tables[id.entity.0].records.get(id.slot as usize)
    }

    pub fn record_mut(&mut self, id: RecordId) -> Option<&mut RecordData> {
        self.tables[id.entity.0].records.get_mut(id.slot as usize)
    }

    pub fn slot(&self, id: RecordId, field: FieldId) -> Option<&FieldSlot> {
        self.record(id).and_then(|data| data.fields.get(field.0))
    }

    pub fn slot_mut(&mut self, id: RecordId, field: FieldId) -> Option<&mut FieldSlot> {
        self.record_mut(id).and_then(|data| data.fields.get_mut(field.0))
    }

    pub fn live_records(&self, entity: EntityId) -> Vec<RecordId> {
        self.tables[entity.0]
            .records
            .iter()
            .enumerate()
            .filter(|(_, data)| data.live)
            .map(|(slot, _)| RecordId {
                entity,
                slot: u32::try_from(slot).unwrap_or(u32::MAX),
            })
            .collect()
    }

    pub fn live_count(&self, entity: EntityId) -> usize {
        self.tables[entity.0]
            .records
            .iter()
            .filter(|data| data.live)
            .count()
    }

    /// Invalidate a computed slot. Returns true on the clean-to-stale
    /// transition so the dirty cascade knows whether to keep walking.
    pub fn mark_dirty(&mut self, id: RecordId, field: FieldId) -> bool {
        match self.slot_mut(id, field) {
            Some(FieldSlot::Computed(slot)) if slot.clean => {
                slot.clean = false;
                true
            }
            _ => false,
        }
    }

    //
    // backrefs (inverse-less incoming references)
    //

    pub fn backref_add(&mut self, target: RecordId, source: RecordId, field: FieldId) {
        self.backrefs.entry(target).or_default().insert((source, field));
    }

    pub fn backref_remove(&mut self, target: RecordId, source: RecordId, field: FieldId) {
        if let Some(set) = self.backrefs.get_mut(&target) {
            set.remove(&(source, field));
            if set.is_empty() {
                self.backrefs.remove(&target);
            }
        }
    }

    pub fn backrefs_of(&self, target: RecordId) -> Vec<(RecordId, FieldId)> {
        self.backrefs
            .get(&target)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
