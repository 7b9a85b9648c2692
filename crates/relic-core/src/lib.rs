//! Core runtime for Relic: the session store, identity registry,
//! relation maintenance, computed-field scheduling, and the insert
//! protocol, with the ergonomics exported via the `prelude`.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod apply;
pub mod error;
pub mod event;
pub mod identity;
pub mod store;

pub(crate) mod compute;
pub(crate) mod reactive;
pub(crate) mod relation;

// test
#[cfg(test)]
pub(crate) mod test_fixtures;

pub use reactive::{ObserverId, RecordId};
pub use relic_schema as schema;

///
/// Prelude
///
/// Domain vocabulary only; error types and the directive grammar are
/// imported from their modules when needed.
///

pub mod prelude {
    pub use crate::{
        ObserverId,
        identity::Identity,
        store::{Record, Store},
    };
    pub use relic_schema::{
        builder::{EntityFragment, Schema, SchemaBuilder},
        descriptor::Field,
        value::Value,
    };
}
