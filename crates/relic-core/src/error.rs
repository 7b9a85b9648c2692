use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// StoreError
///
/// Structured runtime error with a stable internal classification.
/// Carries enough context (entity, field, identity rendering) for a
/// caller to present a meaningful message.
///

#[derive(Clone, Debug, Deserialize, Serialize, ThisError)]
#[error("{message}")]
pub struct StoreError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl StoreError {
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
        }
    }

    /// A payload lacks one or more identity key components.
    pub(crate) fn missing_identity(entity: &str, field: &str) -> Self {
        Self::new(
            ErrorClass::Unresolved,
            ErrorOrigin::Registry,
            format!("payload for entity '{entity}' is missing identity component '{field}'"),
        )
    }

    /// An identity component resolved to a non-scalar value.
    pub(crate) fn non_scalar_identity(entity: &str, field: &str) -> Self {
        Self::new(
            ErrorClass::Unresolved,
            ErrorOrigin::Registry,
            format!("identity component '{field}' of entity '{entity}' must be scalar"),
        )
    }

    /// The named entity type is not part of the session schema.
    pub(crate) fn unknown_entity(entity: &str) -> Self {
        Self::new(
            ErrorClass::Unsupported,
            ErrorOrigin::Registry,
            format!("entity '{entity}' is not registered in this schema"),
        )
    }

    /// The named field does not exist on the entity type.
    pub(crate) fn unknown_field(entity: &str, field: &str) -> Self {
        Self::new(
            ErrorClass::Unsupported,
            ErrorOrigin::Registry,
            format!("entity '{entity}' has no field '{field}'"),
        )
    }

    /// A computed field was targeted by an external write.
    pub(crate) fn computed_read_only(entity: &str, field: &str) -> Self {
        Self::new(
            ErrorClass::Unsupported,
            ErrorOrigin::Apply,
            format!("field '{entity}.{field}' is computed and read-only"),
        )
    }

    /// An identity component of a live record was targeted by a write.
    pub(crate) fn immutable_identity(entity: &str, field: &str) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Registry,
            format!("identity component '{entity}.{field}' cannot change while the record is live"),
        )
    }

    /// A field was accessed through the wrong accessor shape.
    pub(crate) fn field_shape(entity: &str, field: &str, expected: &str) -> Self {
        Self::new(
            ErrorClass::Unsupported,
            ErrorOrigin::Registry,
            format!("field '{entity}.{field}' must be accessed as {expected}"),
        )
    }

    /// A relation write referenced a record of the wrong entity type.
    pub(crate) fn relation_target_mismatch(entity: &str, field: &str, got: &str) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Relation,
            format!("relation '{entity}.{field}' cannot reference a record of entity '{got}'"),
        )
    }

    /// A record handle from a different session was passed in.
    pub(crate) fn foreign_record(entity: &str) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Relation,
            format!("record of entity '{entity}' belongs to a different session"),
        )
    }

    /// A record handle outlived its registry entry.
    pub(crate) fn dead_record(entity: &str) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Registry,
            format!("record of entity '{entity}' is no longer live"),
        )
    }

    /// A computed field re-entered its own evaluation.
    pub(crate) fn cyclic_computation(entity: &str, field: &str) -> Self {
        Self::new(
            ErrorClass::Cycle,
            ErrorOrigin::Compute,
            format!("computed field '{entity}.{field}' depends on itself"),
        )
    }

    /// A payload shape does not fit the directive grammar.
    pub(crate) fn payload_shape(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, ErrorOrigin::Apply, message)
    }
}

///
/// ErrorClass
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorClass {
    /// A payload could not be resolved to a record.
    Unresolved,

    /// A graph consistency rule would have been violated.
    InvariantViolation,

    /// A computed-field dependency chain re-entered itself.
    Cycle,

    /// The operation is outside the schema's declared shape.
    Unsupported,

    /// The caller cannot remediate this.
    Internal,
}

///
/// ErrorOrigin
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    Schema,
    Registry,
    Relation,
    Compute,
    Apply,
}
