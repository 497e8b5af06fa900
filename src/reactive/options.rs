//! Option structs for [`ReactiveDatabase`](super::ReactiveDatabase)
//! operations.

use serde_json::Value;

use crate::backend::{EventType, QueryParams};
use crate::snapshot::Snapshot;

/// Options for `get` and `observe`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObserveOptions {
    /// Event to listen for. Defaults to [`EventType::Value`].
    pub event: EventType,
    pub query: QueryParams,
}

impl ObserveOptions {
    pub fn event(event: EventType) -> Self {
        Self {
            event,
            ..Self::default()
        }
    }

    pub fn query(query: QueryParams) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }
}

/// Options for `save`.
///
/// At least one of `value` and `priority` must be set. On-disconnect saves
/// need a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    pub value: Option<Value>,
    pub priority: Option<Value>,
    /// Queue the write to run when the client disconnects.
    pub on_disconnect: bool,
}

impl SaveOptions {
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Value) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn on_disconnect(mut self) -> Self {
        self.on_disconnect = true;
        self
    }
}

/// Options for `merge`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOptions {
    /// Top-level keys allowed through. `None` keeps every key.
    pub fields: Option<Vec<String>>,
    pub on_disconnect: bool,
}

impl MergeOptions {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: Some(fields.into_iter().map(Into::into).collect()),
            on_disconnect: false,
        }
    }
}

/// Options for `run_transaction`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOptions {
    /// Ask the backend for events on intermediate states. Off by default.
    pub local_events: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            local_events: false,
        }
    }
}

/// Outcome of `run_transaction`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    /// The value at the location once the transaction finished.
    pub snapshot: Option<Snapshot>,
    /// `false` when the update function aborted.
    pub committed: bool,
}
