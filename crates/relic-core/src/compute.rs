//! Typed field access and the computed-field scheduler.
//!
//! Computed fields are lazy: nothing recomputes on write. A write walks
//! the reverse dependency index and flips clean slots to stale; the
//! next read through here re-runs the compute function inside a fresh
//! tracking scope and memoizes the result with its new dependency set.

use crate::{
    error::StoreError,
    reactive::{DepKey, RecordId, Tracker},
    store::{FieldSlot, Store},
};
use relic_schema::{
    builder::ResolvedFieldKind,
    descriptor::{ComputeFn, FieldReader},
    types::{Cardinality, FieldId},
    value::Value,
};
use std::{cell::RefCell, collections::BTreeSet};

/// Read one field as a value. Relations read back as their target
/// identities, so compute functions share one vocabulary with
/// attribute reads.
pub(crate) fn read_field(store: &Store, id: RecordId, field: FieldId) -> Result<Value, StoreError> {
    store.require_live(id)?;
    store.track_read(DepKey::Field(id, field));

    let compute = {
        let entity = store.entity(id.entity);
        match &entity.field(field).kind {
            ResolvedFieldKind::Attribute { compute, .. } => compute.clone(),
            ResolvedFieldKind::Relation { .. } => None,
        }
    };

    if let Some(compute) = compute {
        return evaluate(store, id, field, &compute);
    }

    let graph = store.inner.graph.borrow();
    match graph.slot(id, field) {
        Some(FieldSlot::Attr(value)) => Ok(value.clone()),
        Some(FieldSlot::One(target)) => Ok(target.map_or(Value::Null, |target| {
            graph
                .record(target)
                .map_or(Value::Null, |data| data.identity.as_value())
        })),
        Some(FieldSlot::Many(targets)) => Ok(Value::List(
            targets
                .iter()
                .filter_map(|target| graph.record(*target))
                .map(|data| data.identity.as_value())
                .collect(),
        )),
        _ => Err(StoreError::unknown_field(
            &store.entity(id.entity).name,
            &field.to_string(),
        )),
    }
}

/// Write one attribute. Computed fields are read-only, relation fields
/// go through the relation engine, and identity components of a live
/// record never change. Writing the value already stored is a no-op.
pub(crate) fn write_attr(
    store: &Store,
    id: RecordId,
    field: FieldId,
    value: Value,
) -> Result<(), StoreError> {
    store.require_live(id)?;

    let entity = store.entity(id.entity);
    let descriptor = entity.field(field);

    match &descriptor.kind {
        ResolvedFieldKind::Attribute {
            compute: Some(_), ..
        } => Err(StoreError::computed_read_only(&entity.name, &descriptor.name)),
        ResolvedFieldKind::Relation { .. } => Err(StoreError::field_shape(
            &entity.name,
            &descriptor.name,
            "a relation",
        )),
        ResolvedFieldKind::Attribute { .. } => {
            let changed = {
                let mut graph = store.inner.graph.borrow_mut();
                let Some(FieldSlot::Attr(slot)) = graph.slot_mut(id, field) else {
                    return Ok(());
                };

                if *slot == value {
                    false
                } else if entity.identity.contains(&field) {
                    return Err(StoreError::immutable_identity(
                        &entity.name,
                        &descriptor.name,
                    ));
                } else {
                    *slot = value;
                    true
                }
            };

            if changed {
                store.batch(|| store.mark_write(DepKey::Field(id, field)));
            }

            Ok(())
        }
    }
}

/// Return the memoized value, or re-run the compute function if the
/// slot is stale. Re-entry into a field already on the evaluation stack
/// is a schema cycle and fails rather than looping.
fn evaluate(
    store: &Store,
    id: RecordId,
    field: FieldId,
    compute: &ComputeFn,
) -> Result<Value, StoreError> {
    if store.inner.tracker.borrow().is_computing(id, field) {
        let entity = store.entity(id.entity);
        return Err(StoreError::cyclic_computation(
            &entity.name,
            &entity.field(field).name,
        ));
    }

    let old_deps = {
        let graph = store.inner.graph.borrow();
        match graph.slot(id, field) {
            Some(FieldSlot::Computed(slot)) => {
                if slot.clean {
                    return Ok(slot.value.clone());
                }
                slot.deps.clone()
            }
            _ => BTreeSet::new(),
        }
    };

    let guard = EvalGuard::enter(&store.inner.tracker, id, field);

    let ctx = ComputeCtx {
        store,
        record: id,
        error: RefCell::new(None),
    };
    let value = compute(&ctx);

    let deps = guard.finish();

    // The evaluation stack is unwound either way; a failed run leaves
    // the slot stale so the next read retries.
    if let Some(err) = ctx.error.into_inner() {
        return Err(err);
    }

    store
        .inner
        .tracker
        .borrow_mut()
        .retarget((id, field), &old_deps, &deps);

    let mut graph = store.inner.graph.borrow_mut();
    if let Some(FieldSlot::Computed(slot)) = graph.slot_mut(id, field) {
        slot.value = value.clone();
        slot.deps = deps;
        slot.clean = true;
    }

    Ok(value)
}

///
/// EvalGuard
///
/// Holds one evaluation frame on the tracker. `finish` pops it and
/// hands back the collected read set; `Drop` pops it if the compute
/// function panics, so a caught panic cannot leave a frame behind that
/// later reads would mistake for a cycle.
///

struct EvalGuard<'a> {
    tracker: &'a RefCell<Tracker>,
}

impl<'a> EvalGuard<'a> {
    fn enter(tracker: &'a RefCell<Tracker>, id: RecordId, field: FieldId) -> Self {
        let mut inner = tracker.borrow_mut();
        inner.push_computing(id, field);
        inner.push_scope();
        Self { tracker }
    }

    fn finish(self) -> BTreeSet<DepKey> {
        let deps = {
            let mut inner = self.tracker.borrow_mut();
            let deps = inner.pop_scope();
            inner.pop_computing();
            deps
        };
        std::mem::forget(self);
        deps
    }
}

impl Drop for EvalGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.tracker.borrow_mut();
        inner.pop_scope();
        inner.pop_computing();
    }
}

///
/// ComputeCtx
///
/// The reader handed to compute functions. Errors raised by sibling
/// reads cannot cross the closure boundary, so the first one is parked
/// here and rethrown once the closure returns.
///

struct ComputeCtx<'a> {
    store: &'a Store,
    record: RecordId,
    error: RefCell<Option<StoreError>>,
}

impl ComputeCtx<'_> {
    fn fail(&self, err: StoreError) {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

impl FieldReader for ComputeCtx<'_> {
    fn read(&self, field: &str) -> Value {
        let field_id = {
            let entity = self.store.entity(self.record.entity);
            match entity.field_named(field) {
                Some((id, _)) => id,
                None => {
                    self.fail(StoreError::unknown_field(&entity.name, field));
                    return Value::Null;
                }
            }
        };

        match read_field(self.store, self.record, field_id) {
            Ok(value) => value,
            Err(err) => {
                self.fail(err);
                Value::Null
            }
        }
    }
}

/// Cardinality of a relation field, for shape checks in accessors.
pub(crate) fn relation_cardinality(
    store: &Store,
    id: RecordId,
    field: FieldId,
) -> Option<Cardinality> {
    match &store.entity(id.entity).field(field).kind {
        ResolvedFieldKind::Relation { cardinality, .. } => Some(*cardinality),
        ResolvedFieldKind::Attribute { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorClass, store::Store, test_fixtures};
    use relic_schema::{
        builder::{EntityFragment, Schema, SchemaBuilder},
        descriptor::Field,
    };
    use std::{cell::Cell, rc::Rc};

    /// Schema with an instrumented compute function so memoization can
    /// be asserted by call count.
    fn counted_schema() -> (Schema, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);

        let schema = SchemaBuilder::new()
            .fragment(
                EntityFragment::new("Doc")
                    .identity(["id"])
                    .field(Field::attr("id"))
                    .field(Field::attr("body").default(""))
                    .field(Field::computed("body_len", move |r| {
                        counter.set(counter.get() + 1);
                        match r.read("body") {
                            Value::Text(s) => Value::Int(s.len() as i64),
                            _ => Value::Int(0),
                        }
                    })),
            )
            .build()
            .expect("schema should build");

        (schema, calls)
    }

    #[test]
    fn computed_field_memoizes_until_dependency_write() {
        let (schema, calls) = counted_schema();
        let store = Store::new(schema);
        let doc = store.upsert("Doc", 1).expect("create");

        doc.set("body", "hello").expect("write body");
        for _ in 0..5 {
            assert_eq!(doc.get("body_len").expect("read"), Value::Int(5));
        }
        assert_eq!(calls.get(), 1, "one evaluation across repeated reads");

        doc.set("body", "hi").expect("rewrite body");
        assert_eq!(calls.get(), 1, "writes never recompute eagerly");

        for _ in 0..5 {
            assert_eq!(doc.get("body_len").expect("read"), Value::Int(2));
        }
        assert_eq!(calls.get(), 2, "one evaluation after one invalidation");
    }

    #[test]
    fn unrelated_write_keeps_cache_clean() {
        let (schema, calls) = counted_schema();
        let store = Store::new(schema);
        let doc = store.upsert("Doc", 1).expect("create");

        doc.get("body_len").expect("prime cache");
        assert_eq!(calls.get(), 1);

        let other = store.upsert("Doc", 2).expect("create sibling");
        other.set("body", "elsewhere").expect("write sibling");

        doc.get("body_len").expect("read again");
        assert_eq!(calls.get(), 1, "a sibling record's write must not invalidate us");
    }

    #[test]
    fn cyclic_computation_fails_without_hanging() {
        let store = Store::new(test_fixtures::cyclic_schema());
        let node = store.upsert("Loop", 1).expect("create");

        let err = node.get("x").expect_err("x -> y -> x must fail");
        assert_eq!(err.class, ErrorClass::Cycle);

        let err = node.get("y").expect_err("y -> x -> y must fail");
        assert_eq!(err.class, ErrorClass::Cycle);
    }

    #[test]
    fn failed_cycle_leaves_no_stuck_computing_marker() {
        let schema = SchemaBuilder::new()
            .fragment(
                EntityFragment::new("Node")
                    .identity(["id"])
                    .field(Field::attr("id"))
                    .field(Field::attr("label").default("n"))
                    .field(Field::computed("a", |r| r.read("b")))
                    .field(Field::computed("b", |r| r.read("a")))
                    .field(Field::computed("tag", |r| r.read("label"))),
            )
            .build()
            .expect("schema should build");
        let store = Store::new(schema);
        let node = store.upsert("Node", 1).expect("create");

        node.get("a").expect_err("cycle");

        // Unrelated computed fields on the same record still evaluate.
        assert_eq!(node.get("tag").expect("read tag"), Value::Text("n".into()));
    }

    #[test]
    fn panicking_compute_unwinds_the_evaluation_stack() {
        let explode = Rc::new(Cell::new(true));
        let flag = Rc::clone(&explode);
        let schema = SchemaBuilder::new()
            .fragment(
                EntityFragment::new("Doc")
                    .identity(["id"])
                    .field(Field::attr("id"))
                    .field(Field::computed("volatile", move |r| {
                        assert!(!flag.get(), "compute blew up");
                        r.read("id")
                    })),
            )
            .build()
            .expect("schema should build");
        let store = Store::new(schema);
        let doc = store.upsert("Doc", 1).expect("create");

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| doc.get("volatile")));
        assert!(caught.is_err(), "first read panics");

        // The frame was popped on unwind; a retry must evaluate, not
        // report a phantom cycle.
        explode.set(false);
        assert_eq!(doc.get("volatile").expect("retry"), Value::Int(1));
    }

    #[test]
    fn computed_over_relation_sees_collection_size() {
        let store = Store::new(test_fixtures::forum_schema());
        let thread = store.upsert("Thread", 1).expect("thread");
        assert_eq!(
            thread.get("message_count").expect("count"),
            Value::Int(0)
        );

        let m1 = store.upsert("Message", 10).expect("m1");
        let m2 = store.upsert("Message", 11).expect("m2");
        thread.set_many("messages", &[m1, m2]).expect("wire");

        assert_eq!(
            thread.get("message_count").expect("count"),
            Value::Int(2),
            "structural relation change must invalidate the count"
        );
    }

    #[test]
    fn computed_fields_reject_external_writes() {
        let (schema, _) = counted_schema();
        let store = Store::new(schema);
        let doc = store.upsert("Doc", 1).expect("create");

        let err = doc.set("body_len", 3).expect_err("read-only");
        assert!(err.message.contains("read-only"));
    }

    #[test]
    fn identity_components_are_immutable_while_live() {
        let (schema, _) = counted_schema();
        let store = Store::new(schema);
        let doc = store.upsert("Doc", 1).expect("create");

        doc.set("id", 1).expect("same value is a no-op");
        let err = doc.set("id", 2).expect_err("must not rekey");
        assert!(err.message.contains("cannot change"));
    }
}
