use derive_more::Display;
use serde::{Deserialize, Serialize};

///
/// Cardinality
///
/// `One` holds a singleton-or-empty reference (many-to-one); `Many`
/// holds an ordered collection (one-to-many / many-to-many). Insertion
/// order of `Many` collections is significant.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

///
/// EntityId
///
/// Dense index of an entity type within a built schema. Stable for the
/// lifetime of the schema; assigned in fragment registration order.
///

#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct EntityId(pub usize);

///
/// FieldId
///
/// Dense index of a field within its entity type.
///

#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct FieldId(pub usize);
