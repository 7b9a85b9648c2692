//! Declarative schema layer for relic: entity-type descriptors, schema
//! fragments, the build step that merges them, and fail-fast validation.

pub mod builder;
pub mod descriptor;
pub mod error;
pub mod types;
pub mod validate;
pub mod value;

/// Maximum length for entity schema identifiers.
pub const MAX_ENTITY_NAME_LEN: usize = 64;

/// Maximum length for field schema identifiers.
pub const MAX_FIELD_NAME_LEN: usize = 64;

/// Maximum number of attribute fields allowed in an identity key.
pub const MAX_IDENTITY_FIELDS: usize = 4;

use crate::error::ErrorList;
use thiserror::Error as ThisError;

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        builder::{EntityFragment, Schema, SchemaBuilder},
        descriptor::{Field, FieldKind, FieldReader},
        err,
        error::ErrorList,
        types::{Cardinality, EntityId, FieldId},
        value::Value,
    };
}

///
/// Error
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("schema validation failed: {0}")]
    Validation(ErrorList),
}
