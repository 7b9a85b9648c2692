use derive_more::Display;
use relic_core::{
    apply::BatchError,
    error::{ErrorClass, ErrorOrigin as CoreErrorOrigin, StoreError},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// Error
/// Public error type with a stable kind + origin taxonomy.
///

#[derive(Clone, Debug, Deserialize, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::new(err.class.into(), err.origin.into(), err.message)
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        let message = err.to_string();
        Self::new(err.source.class.into(), err.source.origin.into(), message)
    }
}

impl From<relic_schema::Error> for Error {
    fn from(err: relic_schema::Error) -> Self {
        Self::new(ErrorKind::Schema, ErrorOrigin::Schema, err.to_string())
    }
}

///
/// ErrorKind
/// Public error taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    /// Registration-time schema validation failed.
    Schema,

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

impl From<ErrorClass> for ErrorKind {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Unresolved => Self::Unresolved,
            ErrorClass::InvariantViolation => Self::InvariantViolation,
            ErrorClass::Cycle => Self::Cycle,
            ErrorClass::Unsupported => Self::Unsupported,
            ErrorClass::Internal => Self::Internal,
        }
    }
}

///
/// ErrorOrigin
/// Public origin taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    Schema,
    Registry,
    Relation,
    Compute,
    Apply,
}

impl From<CoreErrorOrigin> for ErrorOrigin {
    fn from(origin: CoreErrorOrigin) -> Self {
        match origin {
            CoreErrorOrigin::Schema => Self::Schema,
            CoreErrorOrigin::Registry => Self::Registry,
            CoreErrorOrigin::Relation => Self::Relation,
            CoreErrorOrigin::Compute => Self::Compute,
            CoreErrorOrigin::Apply => Self::Apply,
        }
    }
}
