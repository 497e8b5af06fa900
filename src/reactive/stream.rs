//! Lazy listener streams.
//!
//! A [`ListenerStream`] holds a setup closure until it is first polled. The
//! first poll registers the backend listener(s); dropping the stream removes
//! them. The first error is terminal: every remaining handle is removed and
//! the stream ends.

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::backend::{Backend, ListenerHandle};
use crate::error::{BackendError, Result};
use crate::mapping::SnapshotChange;
use crate::multiplex::ChangeRegistration;
use crate::snapshot::Snapshot;

/// Stream of `(snapshot, previous_key)` pairs from one listener.
pub type SnapshotStream = ListenerStream<(Snapshot, Option<String>)>;

/// Stream of tagged child changes from the multiplexer.
pub type ChangeStream = ListenerStream<SnapshotChange>;

pub(crate) type Setup<T> = Box<dyn FnOnce() -> Option<Registered<T>> + Send>;

// ============================================================================
// Registration bookkeeping
// ============================================================================

pub(crate) enum Registration {
    Listener {
        backend: Weak<dyn Backend>,
        handle: ListenerHandle,
    },
    Changes(ChangeRegistration),
}

impl Registration {
    fn release(&mut self) {
        match self {
            Self::Listener { backend, handle } => {
                if let Some(backend) = backend.upgrade() {
                    backend.remove_observer(*handle);
                    tracing::debug!(handle = handle.0, "stream listener unregistered");
                }
            }
            Self::Changes(registration) => registration.cancel_all(),
        }
    }
}

/// A live registration and the channel its callbacks feed.
pub(crate) struct Registered<T> {
    rx: mpsc::UnboundedReceiver<std::result::Result<T, BackendError>>,
    registration: Registration,
}

impl<T> Registered<T> {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<std::result::Result<T, BackendError>>,
        registration: Registration,
    ) -> Self {
        Self { rx, registration }
    }
}

impl<T> Drop for Registered<T> {
    fn drop(&mut self) {
        self.rx.close();
        self.registration.release();
    }
}

// ============================================================================
// ListenerStream
// ============================================================================

enum State<T> {
    Idle(Setup<T>),
    Active(Registered<T>),
    Done,
}

#[must_use = "streams do nothing until polled"]
pub struct ListenerStream<T> {
    state: State<T>,
}

impl<T> ListenerStream<T> {
    pub(crate) fn new(setup: Setup<T>) -> Self {
        Self {
            state: State::Idle(setup),
        }
    }

    /// `true` once the backend listeners are registered and not yet released.
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active(_))
    }
}

// No field is ever pinned.
impl<T> Unpin for ListenerStream<T> {}

impl<T> Stream for ListenerStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            match std::mem::replace(&mut this.state, State::Done) {
                State::Idle(setup) => match setup() {
                    Some(registered) => this.state = State::Active(registered),
                    None => return Poll::Ready(None),
                },
                State::Active(mut registered) => {
                    return match registered.rx.poll_recv(cx) {
                        Poll::Pending => {
                            this.state = State::Active(registered);
                            Poll::Pending
                        }
                        Poll::Ready(Some(Ok(item))) => {
                            this.state = State::Active(registered);
                            Poll::Ready(Some(Ok(item)))
                        }
                        // Dropping `registered` releases every handle.
                        Poll::Ready(Some(Err(error))) => Poll::Ready(Some(Err(error.into()))),
                        Poll::Ready(None) => Poll::Ready(None),
                    };
                }
                State::Done => return Poll::Ready(None),
            }
        }
    }
}

impl<T> std::fmt::Debug for ListenerStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Idle(_) => "idle",
            State::Active(_) => "active",
            State::Done => "done",
        };
        f.debug_struct("ListenerStream").field("state", &state).finish()
    }
}

// ============================================================================
// ConnectionStream
// ============================================================================

/// Stream of connection-state flips, starting with the current state.
///
/// A backend error is yielded once and ends the stream.
#[must_use = "streams do nothing until polled"]
#[derive(Debug)]
pub struct ConnectionStream {
    inner: SnapshotStream,
}

impl ConnectionStream {
    pub(crate) fn new(inner: SnapshotStream) -> Self {
        Self { inner }
    }
}

impl Stream for ConnectionStream {
    type Item = Result<bool>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|item| {
            item.map(|result| match result {
                Ok((snapshot, _)) => Ok(snapshot.value().as_bool().unwrap_or(false)),
                Err(error) => {
                    tracing::warn!(%error, "connection listener cancelled");
                    Err(error)
                }
            })
        })
    }
}
