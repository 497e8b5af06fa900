//! Backend contract: the callback-based realtime database client.
//!
//! # Overview
//!
//! [`Backend`] is the capability the rest of the crate is written against.
//! It is object-safe and callback-based: every read, listen and write hands
//! the backend a boxed closure that is invoked later from the backend's
//! single callback queue.
//!
//! # Modules
//!
//! - [`query`]: [`Query`] / [`QueryParams`] and the key/value orderings.
//! - [`memory`]: [`MemoryBackend`], an in-process implementation.
//! - [`events`]: view diffing that turns state changes into child events.
//! - [`push_id`]: chronologically ordered unique keys.

pub mod events;
pub mod memory;
pub mod push_id;
pub mod query;

use serde_json::{json, Map, Value};

use crate::error::BackendError;
use crate::path::Reference;
use crate::snapshot::Snapshot;

pub use memory::{MemoryBackend, MemoryBackendConfig};
pub use query::{Limit, OrderBy, Query, QueryParams};

// ============================================================================
// Event types and handles
// ============================================================================

/// What a listener is notified about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EventType {
    /// The whole value at the location, on every change.
    #[default]
    Value,
    ChildAdded,
    ChildChanged,
    ChildMoved,
    ChildRemoved,
}

impl EventType {
    pub fn is_child_event(self) -> bool {
        !matches!(self, Self::Value)
    }
}

/// Identifies one listener registration. Pass it to
/// [`Backend::remove_observer`] to stop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(pub u64);

// ============================================================================
// Writes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the value (and optionally the priority). `Value::Null` removes.
    Set {
        value: Value,
        priority: Option<Value>,
    },
    SetPriority(Value),
    /// Set each listed child; other children are left untouched. Keys may be
    /// `/`-separated relative paths.
    Update(Map<String, Value>),
    Remove,
}

/// When a write takes effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteTiming {
    #[default]
    Now,
    /// Queued server-side and applied when the client disconnects.
    OnDisconnect,
}

// ============================================================================
// Transactions
// ============================================================================

/// The value a transaction update function sees and edits.
#[derive(Debug, Clone, PartialEq)]
pub struct MutableData {
    key: String,
    value: Value,
}

impl MutableData {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Result of one invocation of a transaction update function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Commit,
    Abort,
}

// ============================================================================
// Server values
// ============================================================================

/// Placeholder the backend replaces with its clock (epoch milliseconds).
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

pub(crate) fn is_server_timestamp(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.len() == 1 && map.get(".sv") == Some(&json!("timestamp")),
        _ => false,
    }
}

// ============================================================================
// Callback types
// ============================================================================

/// Invoked with each event: the snapshot and the previous sibling key.
pub type EventCallback = Box<dyn Fn(Snapshot, Option<String>) + Send + Sync>;

/// Invoked with the first matching event only.
pub type OnceEventCallback = Box<dyn FnOnce(Snapshot, Option<String>) + Send>;

/// Invoked when the backend cancels a listener. The listener is already gone.
pub type CancelCallback = Box<dyn FnOnce(BackendError) + Send>;

/// Completion of a write: the written location, or the failure.
pub type WriteCallback = Box<dyn FnOnce(Result<Reference, BackendError>) + Send>;

/// Transaction update function. May be invoked more than once.
pub type TransactionFn = Box<dyn FnMut(&mut MutableData) -> TransactionOutcome + Send>;

/// Completion of a transaction: the final snapshot and whether it committed.
pub type TransactionCallback =
    Box<dyn FnOnce(Result<(Option<Snapshot>, bool), BackendError>) + Send>;

// ============================================================================
// Backend
// ============================================================================

/// A realtime hierarchical database client.
///
/// Callbacks are delivered one at a time, in order, from a single queue.
/// A callback scheduled before [`Backend::remove_observer`] returns may still
/// run afterwards; consumers must treat such late events as no-ops.
pub trait Backend: Send + Sync + 'static {
    /// Mint a fresh, globally unique child key.
    fn mint_key(&self) -> String;

    /// Listen for `event` on `query` until removed or cancelled.
    fn observe(
        &self,
        query: &Query,
        event: EventType,
        on_event: EventCallback,
        on_cancel: CancelCallback,
    ) -> ListenerHandle;

    /// Listen for the first `event` on `query`, then stop. The handle may be
    /// passed to [`Backend::remove_observer`] to give up before it fires.
    fn observe_once(
        &self,
        query: &Query,
        event: EventType,
        on_event: OnceEventCallback,
        on_cancel: CancelCallback,
    ) -> ListenerHandle;

    /// Unregister a listener. Unknown handles are ignored.
    fn remove_observer(&self, handle: ListenerHandle);

    fn write(
        &self,
        reference: &Reference,
        op: WriteOp,
        timing: WriteTiming,
        on_complete: WriteCallback,
    );

    /// Drop every on-disconnect write queued at or below `reference`.
    fn cancel_disconnect(&self, reference: &Reference, on_complete: WriteCallback);

    /// Atomically read-modify-write the value at `reference`.
    ///
    /// `local_events` asks for events on intermediate states; backends may
    /// only raise events for the committed state.
    fn run_transaction(
        &self,
        reference: &Reference,
        update: TransactionFn,
        local_events: bool,
        on_complete: TransactionCallback,
    );
}
