//! Relic: a reactive, schema-first record graph for client sessions.
//!
//! ## Crate layout
//! - `core`: the session store, identity registry, relation engine,
//!   computed-field scheduler, and insert protocol.
//! - `schema`: entity fragments, field descriptors, builder, and
//!   validation.
//! - `error`: the public error taxonomy wrapping both layers.
//!
//! The `prelude` module mirrors the surface used by application code.

pub use relic_core as core;
pub use relic_schema as schema;

pub mod error;

pub use error::{Error, ErrorKind, ErrorOrigin};

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
/// using _ brings traits into scope and avoids name conflicts
///

pub mod prelude {
    pub use crate::error::{Error, ErrorKind, ErrorOrigin};
    pub use relic_core::{
        ObserverId,
        apply::{Batch, RecordPayload, RelationOp},
        event::{EventSink, StoreEvent},
        identity::Identity,
        store::{Record, Store},
    };
    pub use relic_schema::{
        builder::{EntityFragment, Schema, SchemaBuilder},
        descriptor::{Field, FieldReader as _},
        value::Value,
    };
}
