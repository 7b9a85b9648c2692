use crate::{
    compute,
    error::StoreError,
    identity::Identity,
    reactive::{DepKey, RecordId},
    relation,
    store::{FieldSlot, Store},
};
use relic_schema::{
    types::{Cardinality, FieldId},
    value::Value,
};
use std::{fmt, rc::Rc};

///
/// Record
///
/// Handle to one live record in a session. Handles compare equal when
/// they name the same registry slot; the registry guarantees at most
/// one slot per (entity, identity), so two fetches of the same identity
/// always compare equal. A handle outliving its record turns every
/// access into a dead-record error.
///

#[derive(Clone)]
pub struct Record {
    store: Store,
    id: RecordId,
}

impl Record {
    pub(crate) fn new(store: Store, id: RecordId) -> Self {
        Self { store, id }
    }

    pub(crate) const fn id(&self) -> RecordId {
        self.id
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.store.entity(self.id.entity).name
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.store
            .inner
            .graph
            .borrow()
            .record(self.id)
            .map_or_else(|| Identity::new(Vec::new()), |data| data.identity.clone())
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.store.inner.graph.borrow().is_live(self.id)
    }

    //
    // reads
    //

    /// Read an attribute or computed field. Computed fields evaluate
    /// lazily and memoize; relation fields go through [`Record::one`]
    /// and [`Record::many`] instead.
    pub fn get(&self, field: &str) -> Result<Value, StoreError> {
        let field_id = self.field_named(field)?;
        if self.cardinality(field_id).is_some() {
            return Err(self.shape_error(field, "one() or many()"));
        }

        self.store.read_field(self.id, field_id)
    }

    /// Read a single-valued relation.
    pub fn one(&self, field: &str) -> Result<Option<Self>, StoreError> {
        let field_id = self.relation_field(field, Cardinality::One)?;
        self.store.require_live(self.id)?;
        self.store.track_read(DepKey::Field(self.id, field_id));

        let target = match self.store.inner.graph.borrow().slot(self.id, field_id) {
            Some(FieldSlot::One(target)) => *target,
            _ => None,
        };

        Ok(target.map(|id| Self::new(self.store.clone(), id)))
    }

    /// Read a collection relation, in insertion order.
    pub fn many(&self, field: &str) -> Result<Vec<Self>, StoreError> {
        let field_id = self.relation_field(field, Cardinality::Many)?;
        self.store.require_live(self.id)?;
        self.store.track_read(DepKey::Field(self.id, field_id));

        let targets = match self.store.inner.graph.borrow().slot(self.id, field_id) {
            Some(FieldSlot::Many(targets)) => targets.clone(),
            _ => Vec::new(),
        };

        Ok(targets
            .into_iter()
            .map(|id| Self::new(self.store.clone(), id))
            .collect())
    }

    //
    // writes
    //

    /// Write an attribute. Computed fields and live identity components
    /// are rejected; rewriting the stored value is a no-op.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        let field_id = self.field_named(field)?;
        compute::write_attr(&self.store, self.id, field_id, value.into())
    }

    /// Assign a single-valued relation, maintaining the inverse side.
    pub fn set_one(&self, field: &str, target: Option<&Self>) -> Result<(), StoreError> {
        let field_id = self.relation_field(field, Cardinality::One)?;
        let targets = match target {
            Some(target) => {
                self.check_session(target)?;
                vec![target.id]
            }
            None => Vec::new(),
        };

        relation::set_relation(&self.store, self.id, field_id, targets)
    }

    /// Replace a collection relation wholesale, maintaining inverses on
    /// every added and removed target.
    pub fn set_many(&self, field: &str, targets: &[Self]) -> Result<(), StoreError> {
        let field_id = self.relation_field(field, Cardinality::Many)?;
        for target in targets {
            self.check_session(target)?;
        }

        relation::set_relation(
            &self.store,
            self.id,
            field_id,
            targets.iter().map(|target| target.id).collect(),
        )
    }

    /// Add one target to a relation (append to a collection, assign a
    /// single-valued field).
    pub fn link(&self, field: &str, target: &Self) -> Result<(), StoreError> {
        let field_id = self.any_relation_field(field)?;
        self.check_session(target)?;

        relation::link(&self.store, self.id, field_id, target.id)
    }

    /// Remove one target from a relation without deleting the target.
    pub fn unlink(&self, field: &str, target: &Self) -> Result<(), StoreError> {
        let field_id = self.any_relation_field(field)?;
        self.check_session(target)?;

        relation::unlink(&self.store, self.id, field_id, target.id)
    }

    /// Delete this record, detaching it from every relation that
    /// referenced it.
    pub fn delete(&self) -> Result<(), StoreError> {
        relation::delete_record(&self.store, self.id)
    }

    //
    // plumbing
    //

    fn field_named(&self, field: &str) -> Result<FieldId, StoreError> {
        let entity = self.store.entity(self.id.entity);
        entity
            .field_named(field)
            .map(|(id, _)| id)
            .ok_or_else(|| StoreError::unknown_field(&entity.name, field))
    }

    fn cardinality(&self, field: FieldId) -> Option<Cardinality> {
        compute::relation_cardinality(&self.store, self.id, field)
    }

    fn relation_field(&self, field: &str, expected: Cardinality) -> Result<FieldId, StoreError> {
        let field_id = self.field_named(field)?;
        match self.cardinality(field_id) {
            Some(cardinality) if cardinality == expected => Ok(field_id),
            Some(Cardinality::One) => Err(self.shape_error(field, "a single reference")),
            Some(Cardinality::Many) => Err(self.shape_error(field, "a collection")),
            None => Err(self.shape_error(field, "an attribute")),
        }
    }

    fn any_relation_field(&self, field: &str) -> Result<FieldId, StoreError> {
        let field_id = self.field_named(field)?;
        if self.cardinality(field_id).is_none() {
            return Err(self.shape_error(field, "an attribute"));
        }

        Ok(field_id)
    }

    fn shape_error(&self, field: &str, expected: &str) -> StoreError {
        StoreError::field_shape(&self.store.entity(self.id.entity).name, field, expected)
    }

    fn check_session(&self, target: &Self) -> Result<(), StoreError> {
        if Rc::ptr_eq(&self.store.inner, &target.store.inner) {
            Ok(())
        } else {
            Err(StoreError::foreign_record(target.entity()))
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Rc::ptr_eq(&self.store.inner, &other.store.inner)
    }
}

impl Eq for Record {}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("entity", &self.entity())
            .field("identity", &self.identity())
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::forum_schema;

    fn store() -> Store {
        Store::new(forum_schema())
    }

    #[test]
    fn defaults_apply_on_creation() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("create");

        assert_eq!(thread.get("name").expect("read"), Value::Text("".into()));
        assert_eq!(thread.get("id").expect("read"), Value::Int(1));
    }

    #[test]
    fn identity_components_are_populated_from_the_key() {
        let store = store();
        let message = store.upsert("Message", 42).expect("create");

        assert_eq!(message.identity(), Identity::from(42i64));
        assert_eq!(message.get("id").expect("read"), Value::Int(42));
    }

    #[test]
    fn relation_accessors_enforce_shape() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("create");

        assert!(thread.get("messages").is_err(), "relation via get");
        assert!(thread.one("messages").is_err(), "collection via one");
        assert!(thread.many("name").is_err(), "attribute via many");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("create");

        let err = thread.get("nope").expect_err("unknown field");
        assert!(err.message.contains("no field"));
    }

    #[test]
    fn dead_handles_fail_closed() {
        let store = store();
        let thread = store.upsert("Thread", 1).expect("create");
        thread.delete().expect("delete");

        assert!(!thread.is_live());
        assert!(thread.get("name").is_err());
        assert!(thread.set("name", "x").is_err());
        assert!(thread.many("messages").is_err());
    }

    #[test]
    fn records_from_different_sessions_never_mix() {
        let store_a = store();
        let store_b = store();
        let thread = store_a.upsert("Thread", 1).expect("a");
        let message = store_b.upsert("Message", 1).expect("b");

        let err = thread.link("messages", &message).expect_err("cross-session");
        assert!(err.message.contains("different session"));
    }

    #[test]
    fn handle_equality_is_identity_equality() {
        let store = store();
        let a = store.upsert("Thread", 1).expect("first");
        let b = store.lookup("Thread", 1).expect("lookup").expect("found");

        assert_eq!(a, b);
    }
}
