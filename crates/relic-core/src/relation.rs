//! Relation maintenance.
//!
//! Every relational write funnels through [`set_relation`]: it diffs
//! the old and new target sets, commits the forward side, then fixes up
//! the inverse side of each added and removed target inside the same
//! batch, so no observer can see one side of a relation without the
//! other. Relations without a declared inverse are tracked in a backref
//! index instead, so deletion still detaches every incoming reference.

use crate::{
    error::StoreError,
    event::StoreEvent,
    reactive::{DepKey, RecordId},
    store::{FieldSlot, Graph, Store},
};
use relic_schema::{
    builder::ResolvedFieldKind,
    types::{Cardinality, FieldId},
};
use std::collections::BTreeSet;

/// Replace the target set of one relation field. `targets` is the full
/// new value; order is preserved for collections. Reassigning the value
/// already held is a no-op and raises no notifications.
pub(crate) fn set_relation(
    store: &Store,
    id: RecordId,
    field: FieldId,
    targets: Vec<RecordId>,
) -> Result<(), StoreError> {
    store.require_live(id)?;

    let (target_entity, cardinality, inverse) = {
        let entity = store.entity(id.entity);
        let descriptor = entity.field(field);
        match &descriptor.kind {
            ResolvedFieldKind::Relation {
                target,
                cardinality,
                inverse,
                ..
            } => (*target, *cardinality, *inverse),
            ResolvedFieldKind::Attribute { .. } => {
                return Err(StoreError::field_shape(
                    &entity.name,
                    &descriptor.name,
                    "an attribute",
                ));
            }
        }
    };

    debug_assert!(
        cardinality == Cardinality::Many || targets.len() <= 1,
        "single-valued relation given multiple targets"
    );

    // Validate every target before touching anything.
    let mut seen = BTreeSet::new();
    let mut targets: Vec<RecordId> = {
        let mut deduped = Vec::with_capacity(targets.len());
        for target in targets {
            if target.entity != target_entity {
                let entity = store.entity(id.entity);
                return Err(StoreError::relation_target_mismatch(
                    &entity.name,
                    &entity.field(field).name,
                    &store.entity(target.entity).name,
                ));
            }
            store.require_live(target)?;
            if seen.insert(target) {
                deduped.push(target);
            }
        }
        deduped
    };
    if cardinality == Cardinality::One {
        targets.truncate(1);
    }

    let old: Vec<RecordId> = {
        let graph = store.inner.graph.borrow();
        current_targets(&graph, id, field)
    };
    if old == targets {
        return Ok(());
    }

    store.batch(|| {
        let mut writes = vec![DepKey::Field(id, field)];
        {
            let mut graph = store.inner.graph.borrow_mut();
            let old_set: BTreeSet<RecordId> = old.iter().copied().collect();
            let new_set: BTreeSet<RecordId> = targets.iter().copied().collect();

            match graph.slot_mut(id, field) {
                Some(FieldSlot::One(slot)) => *slot = targets.first().copied(),
                Some(FieldSlot::Many(slot)) => slot.clone_from(&targets),
                _ => {}
            }

            if let Some(inverse) = inverse {
                for removed in old_set.difference(&new_set) {
                    // A self-inverse edge is carried by the forward write alone.
                    if *removed == id && inverse == field {
                        continue;
                    }
                    detach(&mut graph, *removed, inverse, id, &mut writes);
                }
                for added in new_set.difference(&old_set) {
                    if *added == id && inverse == field {
                        continue;
                    }
                    attach(&mut graph, *added, inverse, id, field, &mut writes);
                }
            } else {
                for removed in old_set.difference(&new_set) {
                    graph.backref_remove(*removed, id, field);
                }
                for added in new_set.difference(&old_set) {
                    graph.backref_add(*added, id, field);
                }
            }
        }

        store.mark_writes(writes);
    });

    Ok(())
}

/// Append one target (set, for a single-valued field). Already-linked
/// targets are left in place.
pub(crate) fn link(
    store: &Store,
    id: RecordId,
    field: FieldId,
    target: RecordId,
) -> Result<(), StoreError> {
    let mut targets = {
        let graph = store.inner.graph.borrow();
        current_targets(&graph, id, field)
    };

    if targets.contains(&target) {
        return Ok(());
    }
    match store.inner.graph.borrow().slot(id, field) {
        Some(FieldSlot::One(_)) => targets = vec![target],
        _ => targets.push(target),
    }

    set_relation(store, id, field, targets)
}

/// Remove one target if present; absent targets are a no-op.
pub(crate) fn unlink(
    store: &Store,
    id: RecordId,
    field: FieldId,
    target: RecordId,
) -> Result<(), StoreError> {
    let mut targets = {
        let graph = store.inner.graph.borrow();
        current_targets(&graph, id, field)
    };

    let Some(position) = targets.iter().position(|t| *t == target) else {
        return Ok(());
    };
    targets.remove(position);

    set_relation(store, id, field, targets)
}

/// Delete a record: detach both sides of every relation it takes part
/// in, unregister its identity, and drop its dependency edges. Handles
/// held by callers turn into dead-record errors.
pub(crate) fn delete_record(store: &Store, id: RecordId) -> Result<(), StoreError> {
    store.require_live(id)?;

    let entity = store.entity(id.entity);
    let identity = {
        let graph = store.inner.graph.borrow();
        graph
            .record(id)
            .map(|data| data.identity.clone())
            .ok_or_else(|| StoreError::dead_record(&entity.name))?
    };

    store.batch(|| {
        let mut writes = vec![DepKey::Registry(id.entity)];
        let deps_per_field;
        {
            let mut graph = store.inner.graph.borrow_mut();

            // Outgoing endpoints. For inverse pairs this also covers
            // incoming references, since the inverse slot lists them.
            for (field_id, field) in entity.fields() {
                writes.push(DepKey::Field(id, field_id));

                let ResolvedFieldKind::Relation { inverse, .. } = &field.kind else {
                    continue;
                };
                let targets = current_targets(&graph, id, field_id);

                if let Some(inverse) = inverse {
                    for target in targets {
                        if target == id {
                            continue;
                        }
                        detach(&mut graph, target, *inverse, id, &mut writes);
                    }
                } else {
                    for target in targets {
                        graph.backref_remove(target, id, field_id);
                    }
                }
            }

            // Incoming references from relations without an inverse.
            for (referrer, field_id) in graph.backrefs_of(id) {
                detach(&mut graph, referrer, field_id, id, &mut writes);
            }

            deps_per_field = graph.record(id).map_or_else(Vec::new, |data| {
                data.fields
                    .iter()
                    .map(|slot| match slot {
                        FieldSlot::Computed(slot) => slot.deps.clone(),
                        _ => BTreeSet::new(),
                    })
                    .collect()
            });

            graph.remove(id);
        }

        store
            .inner
            .tracker
            .borrow_mut()
            .forget_record(id, &deps_per_field);
        store.mark_writes(writes);
    });

    store.emit(&StoreEvent::RecordDeleted {
        entity: entity.name.clone(),
        identity,
    });

    Ok(())
}

fn current_targets(graph: &Graph, id: RecordId, field: FieldId) -> Vec<RecordId> {
    match graph.slot(id, field) {
        Some(FieldSlot::One(target)) => target.iter().copied().collect(),
        Some(FieldSlot::Many(targets)) => targets.clone(),
        _ => Vec::new(),
    }
}

/// Remove `referenced` from `holder`'s relation slot.
fn detach(
    graph: &mut Graph,
    holder: RecordId,
    field: FieldId,
    referenced: RecordId,
    writes: &mut Vec<DepKey>,
) {
    match graph.slot_mut(holder, field) {
        Some(FieldSlot::One(slot)) if *slot == Some(referenced) => {
            *slot = None;
            writes.push(DepKey::Field(holder, field));
        }
        Some(FieldSlot::Many(slot)) => {
            if let Some(position) = slot.iter().position(|t| *t == referenced) {
                slot.remove(position);
                writes.push(DepKey::Field(holder, field));
            }
        }
        _ => {}
    }
}

/// Add `source` to `target`'s inverse slot. A single-valued inverse can
/// only hold one record: reassigning it evicts the previous holder's
/// forward reference.
fn attach(
    graph: &mut Graph,
    target: RecordId,
    inverse: FieldId,
    source: RecordId,
    forward: FieldId,
    writes: &mut Vec<DepKey>,
) {
    match graph.slot_mut(target, inverse) {
        Some(FieldSlot::Many(slot)) => {
            if !slot.contains(&source) {
                slot.push(source);
                writes.push(DepKey::Field(target, inverse));
            }
        }
        Some(FieldSlot::One(slot)) => {
            let previous = *slot;
            if previous == Some(source) {
                return;
            }
            *slot = Some(source);
            writes.push(DepKey::Field(target, inverse));

            if let Some(holder) = previous {
                detach(graph, holder, forward, target, writes);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::Store, test_fixtures::forum_schema};
    use proptest::prelude::*;

    fn store() -> Store {
        Store::new(forum_schema())
    }

    #[test]
    fn wiring_one_side_wires_the_inverse() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("thread");
        let message = store.upsert("Message", 10).expect("message");

        message.set_one("thread", Some(&thread)).expect("wire");

        let inverse = thread.many("messages").expect("read inverse");
        assert_eq!(inverse, vec![message.clone()]);

        message.set_one("thread", None).expect("unwire");
        assert!(thread.many("messages").expect("read inverse").is_empty());
    }

    #[test]
    fn collection_write_preserves_insertion_order() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("thread");
        let m1 = store.upsert("Message", 10).expect("m1");
        let m2 = store.upsert("Message", 11).expect("m2");
        let m3 = store.upsert("Message", 12).expect("m3");

        thread
            .set_many("messages", &[m2.clone(), m3.clone(), m1.clone()])
            .expect("wire");

        assert_eq!(
            thread.many("messages").expect("read"),
            vec![m2, m3, m1],
            "collections keep the order they were written in"
        );
    }

    #[test]
    fn reassigning_a_collection_detaches_only_the_removed() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("thread");
        let m1 = store.upsert("Message", 10).expect("m1");
        let m2 = store.upsert("Message", 11).expect("m2");

        thread
            .set_many("messages", &[m1.clone(), m2.clone()])
            .expect("wire both");
        thread.set_many("messages", &[m2.clone()]).expect("drop m1");

        assert!(m1.one("thread").expect("m1 inverse").is_none());
        assert_eq!(m2.one("thread").expect("m2 inverse"), Some(thread));
    }

    #[test]
    fn single_valued_inverse_evicts_previous_holder() {
        let store = store();
        let alice = store.upsert("User", 1).expect("alice");
        let bob = store.upsert("User", 2).expect("bob");
        let profile = store.upsert("Profile", 7).expect("profile");

        alice.set_one("profile", Some(&profile)).expect("alice claims");
        assert_eq!(profile.one("owner").expect("owner"), Some(alice.clone()));

        bob.set_one("profile", Some(&profile)).expect("bob claims");
        assert_eq!(profile.one("owner").expect("owner"), Some(bob));
        assert!(
            alice.one("profile").expect("alice after eviction").is_none(),
            "only one holder at a time"
        );
    }

    #[test]
    fn reassigning_same_value_is_a_no_op() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("thread");
        let message = store.upsert("Message", 10).expect("message");
        message.set_one("thread", Some(&thread)).expect("wire");

        let observed = message.clone();
        let counter = std::rc::Rc::new(std::cell::Cell::new(0));
        let cell = std::rc::Rc::clone(&counter);
        store.observe(move || {
            let _ = observed.one("thread");
            cell.set(cell.get() + 1);
        });
        assert_eq!(counter.get(), 1, "initial run");

        message.set_one("thread", Some(&thread)).expect("same value");
        assert_eq!(counter.get(), 1, "no spurious notification");
    }

    #[test]
    fn deleting_a_target_detaches_inverse_less_referrers() {
        let store = store();
        let user = store.upsert("User", 5).expect("user");
        let m1 = store.upsert("Message", 10).expect("m1");
        let m2 = store.upsert("Message", 11).expect("m2");

        // `author` declares no inverse, so cleanup runs off the backref index.
        m1.set_one("author", Some(&user)).expect("author m1");
        m2.set_one("author", Some(&user)).expect("author m2");

        user.delete().expect("delete user");

        assert!(m1.one("author").expect("m1 author").is_none());
        assert!(m2.one("author").expect("m2 author").is_none());
        assert!(store.lookup("User", 5).expect("lookup").is_none());
    }

    #[test]
    fn deleting_a_collection_member_updates_the_collection() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("thread");
        let m1 = store.upsert("Message", 10).expect("m1");
        let m2 = store.upsert("Message", 11).expect("m2");
        thread
            .set_many("messages", &[m1.clone(), m2.clone()])
            .expect("wire");

        m1.delete().expect("delete m1");

        assert_eq!(thread.many("messages").expect("read"), vec![m2]);
        assert!(store.lookup("Message", 10).expect("lookup").is_none());
        assert!(!m1.is_live());
    }

    #[test]
    fn dead_records_cannot_be_linked() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("thread");
        let message = store.upsert("Message", 10).expect("message");
        message.delete().expect("delete");

        let err = thread.link("messages", &message).expect_err("dead target");
        assert!(err.message.contains("no longer live"));
    }

    proptest! {
        /// Inverse symmetry holds under arbitrary sequences of
        /// collection rewrites: every message's `thread` matches exactly
        /// the threads whose `messages` contain it.
        #[test]
        fn inverse_symmetry_under_random_rewrites(
            steps in proptest::collection::vec((0u8..3, proptest::collection::vec(0u8..5, 0..5)), 1..20)
        ) {
            let store = store();
            let threads: Vec<_> = (0..3)
                .map(|i| store.upsert("Thread", i64::from(i)).expect("thread"))
                .collect();
            let messages: Vec<_> = (0..5)
                .map(|i| store.upsert("Message", 100 + i64::from(i)).expect("message"))
                .collect();

            for (thread_index, picks) in steps {
                let targets: Vec<_> = picks
                    .iter()
                    .map(|pick| messages[*pick as usize].clone())
                    .collect();
                threads[usize::from(thread_index)]
                    .set_many("messages", &targets)
                    .expect("rewrite");
            }

            for message in &messages {
                let owner = message.one("thread").expect("read thread");
                for thread in &threads {
                    let contains = thread
                        .many("messages")
                        .expect("read messages")
                        .contains(message);
                    prop_assert_eq!(
                        contains,
                        owner.as_ref() == Some(thread),
                        "both sides of the relation must agree"
                    );
                }
            }
        }
    }
}
