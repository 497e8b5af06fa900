//! Change: one child-level mutation of an ordered collection.
//!
//! The payload is generic: listeners produce [`SnapshotChange`]s
//! (`Change<Snapshot>`), which [`Change::decode`] turns into `Change<T>`.
//! `previous_key` names the sibling immediately before the affected child
//! at the time of the event, `None` meaning the child is now first.

use serde::de::DeserializeOwned;

use crate::backend::EventType;
use crate::error::DecodeError;
use crate::snapshot::Snapshot;

use super::decode::{decode, Identifiable};

/// The four child mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Delete,
    Insert,
    Move,
    Update,
}

impl ChangeKind {
    /// Registration order used by the multiplexer.
    pub const ALL: [ChangeKind; 4] = [Self::Delete, Self::Insert, Self::Move, Self::Update];

    /// The backend event that reports this kind.
    pub fn event_type(self) -> EventType {
        match self {
            Self::Delete => EventType::ChildRemoved,
            Self::Insert => EventType::ChildAdded,
            Self::Move => EventType::ChildMoved,
            Self::Update => EventType::ChildChanged,
        }
    }
}

/// A child mutation carrying payload `P`.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<P> {
    Delete { value: P, previous_key: Option<String> },
    Insert { value: P, previous_key: Option<String> },
    Move { value: P, previous_key: Option<String> },
    Update { value: P, previous_key: Option<String> },
}

/// A change as delivered by the backend, before decoding.
pub type SnapshotChange = Change<Snapshot>;

impl<P> Change<P> {
    /// Build the variant for `kind`.
    pub fn new(kind: ChangeKind, value: P, previous_key: Option<String>) -> Self {
        match kind {
            ChangeKind::Delete => Self::Delete { value, previous_key },
            ChangeKind::Insert => Self::Insert { value, previous_key },
            ChangeKind::Move => Self::Move { value, previous_key },
            ChangeKind::Update => Self::Update { value, previous_key },
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Delete { .. } => ChangeKind::Delete,
            Self::Insert { .. } => ChangeKind::Insert,
            Self::Move { .. } => ChangeKind::Move,
            Self::Update { .. } => ChangeKind::Update,
        }
    }

    pub fn value(&self) -> &P {
        match self {
            Self::Delete { value, .. }
            | Self::Insert { value, .. }
            | Self::Move { value, .. }
            | Self::Update { value, .. } => value,
        }
    }

    pub fn previous_key(&self) -> Option<&str> {
        match self {
            Self::Delete { previous_key, .. }
            | Self::Insert { previous_key, .. }
            | Self::Move { previous_key, .. }
            | Self::Update { previous_key, .. } => previous_key.as_deref(),
        }
    }

    /// Split into `(kind, payload, previous_key)`.
    pub fn into_parts(self) -> (ChangeKind, P, Option<String>) {
        let kind = self.kind();
        match self {
            Self::Delete { value, previous_key }
            | Self::Insert { value, previous_key }
            | Self::Move { value, previous_key }
            | Self::Update { value, previous_key } => (kind, value, previous_key),
        }
    }

    /// Transform the payload, keeping tag and previous key.
    pub fn map<Q>(self, f: impl FnOnce(P) -> Q) -> Change<Q> {
        let (kind, value, previous_key) = self.into_parts();
        Change::new(kind, f(value), previous_key)
    }

    /// Fallible payload transform. `Ok(None)` drops the change entirely.
    pub fn try_map<Q, E>(
        self,
        f: impl FnOnce(P) -> Result<Option<Q>, E>,
    ) -> Result<Option<Change<Q>>, E> {
        let (kind, value, previous_key) = self.into_parts();
        Ok(f(value)?.map(|value| Change::new(kind, value, previous_key)))
    }
}

impl Change<Snapshot> {
    /// Decode the payload into `T`.
    ///
    /// A payload without a value yields `Ok(None)`: there is no typed change
    /// to emit, and that is not an error.
    pub fn decode<T>(&self) -> Result<Option<Change<T>>, DecodeError>
    where
        T: DeserializeOwned + Identifiable,
    {
        Ok(decode::<T>(self.value())?
            .map(|value| Change::new(self.kind(), value, self.previous_key().map(str::to_string))))
    }
}
