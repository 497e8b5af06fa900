//! Listener multiplexer: one ordered change channel from four child-event
//! listeners.
//!
//! [`observe_changes`] attaches a `ChildRemoved`, `ChildAdded`, `ChildMoved`
//! and `ChildChanged` listener (in that order) to the same query. Each
//! callback tags its snapshot with the matching [`ChangeKind`] and sends it
//! into one unbounded channel, so the receiver sees events exactly in the
//! backend's delivery order.
//!
//! Cancellation is explicit. Dropping the [`ChangeRegistration`] does not
//! unregister anything; call [`ChangeRegistration::cancel`] or
//! [`ChangeRegistration::cancel_all`]. A backend error ends only the listener
//! it was raised on; siblings keep running.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;

use crate::backend::{Backend, ListenerHandle, Query};
use crate::error::BackendError;
use crate::mapping::{Change, ChangeKind, SnapshotChange};

pub type ChangeItem = Result<SnapshotChange, BackendError>;
pub type ChangeReceiver = mpsc::UnboundedReceiver<ChangeItem>;

/// Register one listener per [`ChangeKind`] on `query`, fanned into a single
/// channel.
pub fn observe_changes<B: Backend>(
    backend: &Arc<B>,
    query: &Query,
) -> (ChangeReceiver, ChangeRegistration) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut handles = Vec::with_capacity(ChangeKind::ALL.len());

    for kind in ChangeKind::ALL {
        let events = tx.clone();
        let cancelled = tx.clone();
        let handle = backend.observe(
            query,
            kind.event_type(),
            Box::new(move |snapshot, previous_key| {
                // The receiver may already be gone; late events are dropped.
                let _ = events.send(Ok(Change::new(kind, snapshot, previous_key)));
            }),
            Box::new(move |error| {
                let _ = cancelled.send(Err(error));
            }),
        );
        handles.push((kind, handle));
    }

    tracing::debug!(
        reference = %query.reference,
        handles = ?handles,
        "change listeners registered"
    );

    let backend: Weak<B> = Arc::downgrade(backend);
    let backend: Weak<dyn Backend> = backend;
    (rx,ChangeRegistration { backend, handles })
}

/// The four listener handles behind one [`observe_changes`] call.
#[must_use = "dropping a ChangeRegistration does not unregister its listeners"]
pub struct ChangeRegistration {
    backend: Weak<dyn Backend>,
    handles: Vec<(ChangeKind, ListenerHandle)>,
}

impl ChangeRegistration {
    /// Live handles, in registration order.
    pub fn handles(&self) -> &[(ChangeKind, ListenerHandle)] {
        &self.handles
    }

    pub fn is_active(&self, kind: ChangeKind) -> bool {
        self.handles.iter().any(|(k, _)| *k == kind)
    }

    /// Unregister the listener for `kind`. Other kinds stay registered.
    pub fn cancel(&mut self, kind: ChangeKind) {
        let Some(pos) = self.handles.iter().position(|(k, _)| *k == kind) else {
            return;
        };
        let (_, handle) = self.handles.remove(pos);
        self.remove(&[handle]);
    }

    /// Unregister every remaining listener.
    pub fn cancel_all(&mut self) {
        let handles: Vec<ListenerHandle> = self.handles.drain(..).map(|(_, h)| h).collect();
        self.remove(&handles);
    }

    fn remove(&self, handles: &[ListenerHandle]) {
        if handles.is_empty() {
            return;
        }
        let Some(backend) = self.backend.upgrade() else {
            tracing::debug!(?handles, "backend released; nothing to unregister");
            return;
        };
        for handle in handles {
            backend.remove_observer(*handle);
        }
        tracing::debug!(?handles, "change listeners unregistered");
    }
}

impl std::fmt::Debug for ChangeRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeRegistration")
            .field("handles", &self.handles)
            .finish()
    }
}
