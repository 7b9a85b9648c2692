//! Store event boundary.
//!
//! Core graph logic does not log; warning-level conditions and batch
//! summaries flow through `StoreEvent` to whatever sink the session
//! owner installs. Without a sink, events are dropped.

use crate::identity::Identity;

///
/// StoreEvent
///

#[derive(Clone, Debug)]
pub enum StoreEvent {
    /// A required many-to-one relation resolved to nothing after an
    /// insert. Recoverable: the field keeps its previous value.
    RequiredRelationUnresolved {
        entity: String,
        identity: Identity,
        field: String,
    },

    /// A batch of directives fully applied.
    BatchApplied { directives: usize },

    /// A record left the registry, either through an explicit delete or
    /// a `delete` directive.
    RecordDeleted { entity: String, identity: Identity },
}

///
/// EventSink
///

pub trait EventSink {
    fn record(&self, event: &StoreEvent);
}
