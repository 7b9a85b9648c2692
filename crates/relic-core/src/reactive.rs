//! Dependency tracking and batched change notification.
//!
//! Every field access goes through typed accessors keyed by
//! `(record, field)`; there are no dynamic proxies. Reads inside a
//! tracking scope collect dependency keys, writes accumulate in a
//! pending set, and observers are notified once per batch after the
//! outermost mutation entry point completes (defer-and-flush).

use relic_schema::types::{EntityId, FieldId};
use std::collections::{BTreeMap, BTreeSet};

///
/// RecordId
///
/// Stable handle to one record slot. Slots are never reused while a
/// session lives, so a `RecordId` never aliases a different record.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct RecordId {
    pub entity: EntityId,
    pub slot: u32,
}

///
/// DepKey
///
/// One trackable unit of state. `Field` covers attribute values,
/// computed values and relation endpoints (structural collection
/// changes are writes to the owning field key). `Registry` covers
/// entity-level membership, so lookups observe creation and deletion.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) enum DepKey {
    Field(RecordId, FieldId),
    Registry(EntityId),
}

///
/// Tracker
///
/// Session-scoped reactive state: the scope stack collecting reads, the
/// computed-field evaluation stack for cycle detection, the pending
/// change set, and the reverse dependency index used to dirty computed
/// fields on write.
///

#[derive(Default)]
pub(crate) struct Tracker {
    scopes: Vec<BTreeSet<DepKey>>,
    computing: Vec<(RecordId, FieldId)>,
    pending: BTreeSet<DepKey>,
    batch_depth: usize,
    dependents: BTreeMap<DepKey, BTreeSet<(RecordId, FieldId)>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    //
    // read tracking
    //

    /// Record a read into the innermost tracking scope, if any.
    pub fn track_read(&mut self, key: DepKey) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(key);
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(BTreeSet::new());
    }

    pub fn pop_scope(&mut self) -> BTreeSet<DepKey> {
        self.scopes.pop().unwrap_or_default()
    }

    //
    // computed-field evaluation stack
    //

    pub fn is_computing(&self, record: RecordId, field: FieldId) -> bool {
        self.computing.contains(&(record, field))
    }

    pub fn push_computing(&mut self, record: RecordId, field: FieldId) {
        self.computing.push((record, field));
    }

    pub fn pop_computing(&mut self) {
        self.computing.pop();
    }

    //
    // write batching
    //

    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Close one batch level. Returns the coalesced change set when the
    /// outermost level closes; inner levels return `None`.
    pub fn end_batch(&mut self) -> Option<BTreeSet<DepKey>> {
        debug_assert!(self.batch_depth > 0, "unbalanced batch scope");
        self.batch_depth = self.batch_depth.saturating_sub(1);

        if self.batch_depth == 0 {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    pub fn mark_pending(&mut self, key: DepKey) {
        self.pending.insert(key);
    }

    //
    // reverse dependency index
    //

    pub fn dependents_of(&self, key: DepKey) -> Vec<(RecordId, FieldId)> {
        self.dependents
            .get(&key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Replace the dependency edges of one computed field.
    pub fn retarget(
        &mut self,
        computed: (RecordId, FieldId),
        old: &BTreeSet<DepKey>,
        new: &BTreeSet<DepKey>,
    ) {
        for key in old {
            if let Some(set) = self.dependents.get_mut(key) {
                set.remove(&computed);
                if set.is_empty() {
                    self.dependents.remove(key);
                }
            }
        }
        for key in new {
            self.dependents.entry(*key).or_default().insert(computed);
        }
    }

    /// Drop every edge owned by one record, on deletion.
    pub fn forget_record(&mut self, record: RecordId, deps_per_field: &[BTreeSet<DepKey>]) {
        for (index, deps) in deps_per_field.iter().enumerate() {
            let computed = (record, FieldId(index));
            for key in deps {
                if let Some(set) = self.dependents.get_mut(key) {
                    set.remove(&computed);
                    if set.is_empty() {
                        self.dependents.remove(key);
                    }
                }
            }
        }
    }
}

///
/// ObserverId
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObserverId(pub(crate) usize);

///
/// Observers
///
/// External subscribers. Each observer owns the dependency set captured
/// during its last run; a flush re-runs exactly those whose set
/// intersects the batch's change set.
///

#[derive(Default)]
pub(crate) struct Observers {
    slots: Vec<ObserverSlot>,
}

struct ObserverSlot {
    deps: BTreeSet<DepKey>,
    callback: Option<Box<dyn FnMut()>>,
    disposed: bool,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, deps: BTreeSet<DepKey>, callback: Box<dyn FnMut()>) -> ObserverId {
        self.slots.push(ObserverSlot {
            deps,
            callback: Some(callback),
            disposed: false,
        });

        ObserverId(self.slots.len() - 1)
    }

    pub fn dispose(&mut self, id: ObserverId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.disposed = true;
            slot.callback = None;
            slot.deps.clear();
        }
    }

    /// Observer ids whose dependency set intersects `changed`.
    pub fn stale(&self, changed: &BTreeSet<DepKey>) -> Vec<ObserverId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                !slot.disposed && slot.deps.iter().any(|key| changed.contains(key))
            })
            .map(|(index, _)| ObserverId(index))
            .collect()
    }

    /// Detach a callback for execution outside the registry borrow.
    pub fn take_callback(&mut self, id: ObserverId) -> Option<Box<dyn FnMut()>> {
        self.slots.get_mut(id.0).and_then(|slot| slot.callback.take())
    }

    /// Reattach a callback with the dependency set from its latest run.
    pub fn restore(&mut self, id: ObserverId, callback: Box<dyn FnMut()>, deps: BTreeSet<DepKey>) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            if slot.disposed {
                return;
            }
            slot.callback = Some(callback);
            slot.deps = deps;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(entity: usize, slot: u32, field: usize) -> DepKey {
        DepKey::Field(
            RecordId {
                entity: EntityId(entity),
                slot,
            },
            FieldId(field),
        )
    }

    #[test]
    fn reads_collect_into_innermost_scope() {
        let mut tracker = Tracker::new();
        tracker.track_read(key(0, 0, 0)); // no scope, dropped

        tracker.push_scope();
        tracker.track_read(key(0, 0, 1));
        tracker.push_scope();
        tracker.track_read(key(0, 0, 2));

        let inner = tracker.pop_scope();
        assert_eq!(inner.len(), 1);
        assert!(inner.contains(&key(0, 0, 2)));

        let outer = tracker.pop_scope();
        assert_eq!(outer.len(), 1);
        assert!(outer.contains(&key(0, 0, 1)));
    }

    #[test]
    fn nested_batches_coalesce_into_outermost_flush() {
        let mut tracker = Tracker::new();
        tracker.begin_batch();
        tracker.mark_pending(key(0, 0, 0));

        tracker.begin_batch();
        tracker.mark_pending(key(0, 0, 1));
        tracker.mark_pending(key(0, 0, 0)); // duplicate write coalesces
        assert!(tracker.end_batch().is_none(), "inner close must not flush");

        let changed = tracker.end_batch().expect("outermost close flushes");
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn retarget_replaces_dependency_edges() {
        let mut tracker = Tracker::new();
        let computed = (
            RecordId {
                entity: EntityId(0),
                slot: 0,
            },
            FieldId(3),
        );

        let old = BTreeSet::from([key(0, 0, 0)]);
        tracker.retarget(computed, &BTreeSet::new(), &old);
        assert_eq!(tracker.dependents_of(key(0, 0, 0)), vec![computed]);

        let new = BTreeSet::from([key(0, 0, 1)]);
        tracker.retarget(computed, &old, &new);
        assert!(tracker.dependents_of(key(0, 0, 0)).is_empty());
        assert_eq!(tracker.dependents_of(key(0, 0, 1)), vec![computed]);
    }

    #[test]
    fn disposed_observers_never_report_stale() {
        let mut observers = Observers::new();
        let deps = BTreeSet::from([key(0, 0, 0)]);
        let id = observers.register(deps.clone(), Box::new(|| {}));

        assert_eq!(observers.stale(&deps), vec![id]);
        observers.dispose(id);
        assert!(observers.stale(&deps).is_empty());
    }
}
