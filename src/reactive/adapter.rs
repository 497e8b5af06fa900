//! ReactiveDatabase<B>: futures and streams over a callback [`Backend`].
//!
//! # Ownership
//!
//! The adapter holds a `Weak<B>`. Every operation upgrades it when it starts
//! and releases the strong reference before awaiting, so an adapter (or a
//! pending future, or a live stream) never keeps the backend alive. A
//! released backend fails single-result operations with
//! [`RtdbError::BackendReleased`] and ends streams.
//!
//! # Laziness
//!
//! Nothing touches the backend until a future is first polled or a stream
//! first asked for an item. `NewChild` path components are therefore
//! resolved to fresh keys at that moment, once per operation.

use std::sync::{Arc, Weak};

use futures_util::{future, Stream, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use crate::backend::memory::INFO_SEGMENT;
use crate::backend::{
    Backend, EventType, ListenerHandle, MutableData, Query, QueryParams, TransactionOutcome,
    WriteOp, WriteTiming,
};
use crate::error::{BackendError, Result, RtdbError};
use crate::mapping::{decode, encode, encode_map, Change, Identifiable};
use crate::multiplex;
use crate::path::{Path, Reference};
use crate::snapshot::Snapshot;

use super::options::{
    MergeOptions, ObserveOptions, SaveOptions, TransactionOptions, TransactionResult,
};
use super::stream::{
    ChangeStream, ConnectionStream, ListenerStream, Registered, Registration, SnapshotStream,
};

// ============================================================================
// One-shot completion shared by two callbacks
// ============================================================================

/// A oneshot sender both the event and the cancel callback can complete.
/// Whichever fires first wins.
struct Completer<T>(Arc<Mutex<Option<oneshot::Sender<T>>>>);

impl<T> Completer<T> {
    fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    fn complete(&self, value: T) {
        if let Some(tx) = self.0.lock().take() {
            let _ = tx.send(value);
        }
    }
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Removes a once-listener when its future goes away. Removing one that
/// already fired is a no-op.
struct OnceListener<B: Backend> {
    backend: Weak<B>,
    handle: ListenerHandle,
}

impl<B: Backend> Drop for OnceListener<B> {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.upgrade() {
            backend.remove_observer(self.handle);
        }
    }
}

// ============================================================================
// ReactiveDatabase
// ============================================================================

pub struct ReactiveDatabase<B: Backend> {
    backend: Weak<B>,
}

impl<B: Backend> Clone for ReactiveDatabase<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Weak::clone(&self.backend),
        }
    }
}

impl<B: Backend> std::fmt::Debug for ReactiveDatabase<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveDatabase")
            .field("backend_alive", &(self.backend.strong_count() > 0))
            .finish()
    }
}

impl<B: Backend> ReactiveDatabase<B> {
    pub fn new(backend: &Arc<B>) -> Self {
        Self {
            backend: Arc::downgrade(backend),
        }
    }

    fn backend(&self, operation: &'static str) -> Result<Arc<B>> {
        self.backend.upgrade().ok_or_else(|| {
            tracing::warn!(operation, "backend released");
            RtdbError::BackendReleased
        })
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Read the location once. Resolves with the first event of
    /// `options.event` (default [`EventType::Value`]).
    pub async fn get(
        &self,
        path: &Path,
        options: ObserveOptions,
    ) -> Result<(Snapshot, Option<String>)> {
        let backend = self.backend("get")?;
        let query = Query::new(path.resolve(&*backend), options.query);
        let (done, rx) = Completer::channel();
        let cancelled = done.clone();
        let handle = backend.observe_once(
            &query,
            options.event,
            Box::new(move |snapshot, previous_key| done.complete(Ok((snapshot, previous_key)))),
            Box::new(move |error| cancelled.complete(Err(error))),
        );
        let _listener = OnceListener {
            backend: Weak::clone(&self.backend),
            handle,
        };
        drop(backend);

        Ok(rx.await.map_err(|_| RtdbError::BackendReleased)??)
    }

    /// Listen for `options.event` until the stream is dropped.
    pub fn observe(&self, path: &Path, options: ObserveOptions) -> SnapshotStream {
        let backend = Weak::clone(&self.backend);
        let path = path.clone();
        ListenerStream::new(Box::new(move || {
            let Some(backend) = backend.upgrade() else {
                tracing::warn!(operation = "observe", "backend released");
                return None;
            };
            let query = Query::new(path.resolve(&*backend), options.query);
            Some(listen(&backend, &query, options.event))
        }))
    }

    /// Child changes under `path`, tagged and in delivery order.
    pub fn observe_changes(&self, path: &Path, params: QueryParams) -> ChangeStream {
        let backend = Weak::clone(&self.backend);
        let path = path.clone();
        ListenerStream::new(Box::new(move || {
            let Some(backend) = backend.upgrade() else {
                tracing::warn!(operation = "observe_changes", "backend released");
                return None;
            };
            let query = Query::new(path.resolve(&*backend), params);
            let (rx, registration) = multiplex::observe_changes(&backend, &query);
            Some(Registered::new(rx, Registration::Changes(registration)))
        }))
    }

    /// Connection state, starting with the current value.
    pub fn is_connected(&self) -> ConnectionStream {
        let backend = Weak::clone(&self.backend);
        ConnectionStream::new(ListenerStream::new(Box::new(move || {
            let Some(backend) = backend.upgrade() else {
                tracing::warn!(operation = "is_connected", "backend released");
                return None;
            };
            let reference =
                Reference::from_segments(vec![INFO_SEGMENT.to_string(), "connected".to_string()]);
            Some(listen(&backend, &Query::at(reference), EventType::Value))
        })))
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write a value and/or a priority. Resolves with the written key.
    pub async fn save(&self, path: &Path, options: SaveOptions) -> Result<Option<String>> {
        let when = timing(options.on_disconnect);
        let op = match (options.value, options.priority) {
            (Some(value), priority) => WriteOp::Set { value, priority },
            (None, Some(_)) if options.on_disconnect => {
                return Err(BackendError::InvalidWrite(
                    "on-disconnect saves need a value".to_string(),
                )
                .into())
            }
            (None, Some(priority)) => WriteOp::SetPriority(priority),
            (None, None) => {
                return Err(BackendError::InvalidWrite(
                    "save needs a value or a priority".to_string(),
                )
                .into())
            }
        };
        self.write("save", path, op, when).await
    }

    /// Update the listed children, leaving the others untouched. With
    /// `options.fields` set, only those top-level keys are written.
    pub async fn merge(
        &self,
        path: &Path,
        mut partial: Map<String, Value>,
        options: MergeOptions,
    ) -> Result<Option<String>> {
        if let Some(fields) = &options.fields {
            partial.retain(|key, _| fields.iter().any(|f| f == key));
        }
        self.write(
            "merge",
            path,
            WriteOp::Update(partial),
            timing(options.on_disconnect),
        )
        .await
    }

    pub async fn delete(&self, path: &Path, on_disconnect: bool) -> Result<Option<String>> {
        self.write("delete", path, WriteOp::Remove, timing(on_disconnect))
            .await
    }

    /// Atomically read-modify-write the value at `path`. `update` may run
    /// more than once; returning `Err` aborts without writing.
    pub async fn run_transaction<F, E>(
        &self,
        path: &Path,
        mut update: F,
        options: TransactionOptions,
    ) -> Result<TransactionResult>
    where
        F: FnMut(&mut MutableData) -> std::result::Result<(), E> + Send + 'static,
    {
        let backend = self.backend("run_transaction")?;
        let reference = path.resolve(&*backend);
        let (done, rx) = oneshot::channel();
        backend.run_transaction(
            &reference,
            Box::new(move |data| match update(data) {
                Ok(()) => TransactionOutcome::Commit,
                Err(_) => TransactionOutcome::Abort,
            }),
            options.local_events,
            Box::new(move |result| {
                let _ = done.send(result);
            }),
        );
        drop(backend);

        let (snapshot, committed) = rx.await.map_err(|_| RtdbError::BackendReleased)??;
        if !committed {
            tracing::debug!(%reference, "transaction aborted");
        }
        Ok(TransactionResult {
            snapshot,
            committed,
        })
    }

    /// Drop every on-disconnect write queued at or below `path`. Resolves
    /// with the key of the location.
    pub async fn cancel_pending_disconnect_ops(&self, path: &Path) -> Result<Option<String>> {
        let backend = self.backend("cancel_pending_disconnect_ops")?;
        let reference = path.resolve(&*backend);
        let (done, rx) = oneshot::channel();
        backend.cancel_disconnect(
            &reference,
            Box::new(move |result| {
                let _ = done.send(result);
            }),
        );
        drop(backend);

        let cancelled = rx.await.map_err(|_| RtdbError::BackendReleased)??;
        Ok(cancelled.key().map(str::to_string))
    }

    async fn write(
        &self,
        operation: &'static str,
        path: &Path,
        op: WriteOp,
        timing: WriteTiming,
    ) -> Result<Option<String>> {
        let backend = self.backend(operation)?;
        let reference = path.resolve(&*backend);
        let (done, rx) = oneshot::channel();
        backend.write(
            &reference,
            op,
            timing,
            Box::new(move |result| {
                let _ = done.send(result);
            }),
        );
        drop(backend);

        let written = rx.await.map_err(|_| RtdbError::BackendReleased)??;
        Ok(written.key().map(str::to_string))
    }

    // ------------------------------------------------------------------------
    // Typed helpers
    // ------------------------------------------------------------------------

    pub async fn get_as<T>(&self, path: &Path, options: ObserveOptions) -> Result<Option<T>>
    where
        T: DeserializeOwned + Identifiable,
    {
        let (snapshot, _) = self.get(path, options).await?;
        Ok(decode::<T>(&snapshot)?)
    }

    /// [`observe`](Self::observe) with each snapshot decoded into `T`.
    pub fn observe_as<T>(
        &self,
        path: &Path,
        options: ObserveOptions,
    ) -> impl Stream<Item = Result<(Option<T>, Option<String>)>> + Send + Unpin
    where
        T: DeserializeOwned + Identifiable + Send,
    {
        self.observe(path, options).map(|item| -> Result<(Option<T>, Option<String>)> {
            let (snapshot, previous_key) = item?;
            Ok((decode::<T>(&snapshot)?, previous_key))
        })
    }

    /// [`observe_changes`](Self::observe_changes) with payloads decoded into
    /// `T`. Changes whose payload has no value are skipped.
    pub fn observe_changes_as<T>(
        &self,
        path: &Path,
        params: QueryParams,
    ) -> impl Stream<Item = Result<Change<T>>> + Send + Unpin
    where
        T: DeserializeOwned + Identifiable + Send,
    {
        self.observe_changes(path, params).filter_map(|item| {
            future::ready(match item {
                Ok(change) => change.decode::<T>().map_err(RtdbError::from).transpose(),
                Err(error) => Some(Err(error)),
            })
        })
    }

    /// Save `record` as the value at `path`. Its `id` field is not written;
    /// the key carries it.
    pub async fn save_record<T>(
        &self,
        path: &Path,
        record: &T,
        options: SaveOptions,
    ) -> Result<Option<String>>
    where
        T: Serialize + ?Sized,
    {
        let value = encode(record)?;
        self.save(
            path,
            SaveOptions {
                value: Some(value),
                ..options
            },
        )
        .await
    }

    pub async fn merge_record<T>(
        &self,
        path: &Path,
        record: &T,
        options: MergeOptions,
    ) -> Result<Option<String>>
    where
        T: Serialize + ?Sized,
    {
        let partial = encode_map(record)?;
        self.merge(path, partial, options).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn timing(on_disconnect: bool) -> WriteTiming {
    if on_disconnect {
        WriteTiming::OnDisconnect
    } else {
        WriteTiming::Now
    }
}

/// Register one listener feeding a fresh channel.
fn listen<B: Backend>(
    backend: &Arc<B>,
    query: &Query,
    event: EventType,
) -> Registered<(Snapshot, Option<String>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancelled = tx.clone();
    let handle = backend.observe(
        query,
        event,
        Box::new(move |snapshot, previous_key| {
            let _ = tx.send(Ok((snapshot, previous_key)));
        }),
        Box::new(move |error| {
            let _ = cancelled.send(Err(error));
        }),
    );
    tracing::debug!(handle = handle.0, reference = %query.reference, ?event, "stream listener registered");

    let backend: Weak<B> = Arc::downgrade(backend);
    let backend: Weak<dyn Backend> = backend;
    Registered::new(rx, Registration::Listener { backend, handle })
}
