//! Mapping between snapshots and typed records.
//!
//! # Modules
//!
//! - [`decode`]: snapshot → `T` with key-as-id injection ([`decode()`],
//!   [`decode_list`], [`decode_set`]).
//! - [`encode`]: `T` → semantic tree for writes.
//! - [`change`]: the [`Change`] sum type and its decoder.
//! - [`millis`]: serde helpers for epoch-millisecond dates.

pub mod change;
pub mod decode;
pub mod encode;
pub mod millis;

pub use change::{Change, ChangeKind, SnapshotChange};
pub use decode::{decode, decode_list, decode_set, snapshot_data, Identifiable, SnapshotData};
pub use encode::{encode, encode_map};
