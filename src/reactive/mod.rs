//! Reactive layer: futures and streams over a callback [`Backend`].
//!
//! # Overview
//!
//! [`ReactiveDatabase`] wraps a `Weak` reference to a backend and exposes
//! every operation as a cold future (single result) or a lazy stream
//! (unbounded). Streams register their listeners on first poll and remove
//! them when dropped.
//!
//! # Modules
//!
//! - [`adapter`]: [`ReactiveDatabase<B>`].
//! - [`options`]: per-operation option structs and [`TransactionResult`].
//! - [`stream`]: [`SnapshotStream`], [`ChangeStream`], [`ConnectionStream`].
//!
//! [`Backend`]: crate::backend::Backend

pub mod adapter;
pub mod options;
pub mod stream;

pub use adapter::ReactiveDatabase;
pub use options::{MergeOptions, ObserveOptions, SaveOptions, TransactionOptions, TransactionResult};
pub use stream::{ChangeStream, ConnectionStream, ListenerStream, SnapshotStream};
