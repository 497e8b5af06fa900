//! Reactive, typed access to a realtime hierarchical database.
//!
//! # Overview
//!
//! - [`path`]: typed locations ([`Path`]) and resolved ones ([`Reference`]).
//! - [`snapshot`]: point-in-time values read from the backend.
//! - [`mapping`]: snapshot ⇄ record mapping and the [`Change`] sum type.
//! - [`backend`]: the callback [`Backend`] contract, queries, and the
//!   in-process [`MemoryBackend`].
//! - [`multiplex`]: four child-event listeners fanned into one channel.
//! - [`reactive`]: [`ReactiveDatabase`]: futures and streams on top.
//! - [`error`]: error types.

pub mod backend;
pub mod error;
pub mod mapping;
pub mod multiplex;
pub mod path;
pub mod reactive;
pub mod snapshot;

pub use backend::{
    server_timestamp, Backend, EventType, MemoryBackend, MemoryBackendConfig, Query, QueryParams,
};
pub use error::{BackendError, DecodeError, EncodeError, PathError, Result, RtdbError};
pub use mapping::{Change, ChangeKind, Identifiable, SnapshotChange};
pub use path::{Path, Reference};
pub use reactive::ReactiveDatabase;
pub use snapshot::Snapshot;
