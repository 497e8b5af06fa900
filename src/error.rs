use thiserror::Error;

// ---------------------------------------------------------------------------
// PathError
// ---------------------------------------------------------------------------

/// Malformed path text. Returned at construction time; no partial `Path`
/// is ever produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Path \"{path}\" is empty")]
    Empty { path: String },

    #[error("Path \"{path}\" contains an empty segment at position {index}")]
    EmptySegment { path: String, index: usize },
}

// ---------------------------------------------------------------------------
// DecodeError / EncodeError
// ---------------------------------------------------------------------------

/// Snapshot value does not match the target schema.
#[derive(Debug, Error)]
#[error("Failed to decode snapshot \"{key}\": {source}")]
pub struct DecodeError {
    pub key: String,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Value is not serializable: {0}")]
    NotSerializable(#[source] serde_json::Error),

    #[error("Encoded value is not a map; merge requires an object, got {0}")]
    NotAMap(&'static str),
}

// ---------------------------------------------------------------------------
// BackendError
// ---------------------------------------------------------------------------

/// Failure reported by the backend client. Opaque to the mapping layer and
/// passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Permission denied at \"{path}\"")]
    PermissionDenied { path: String },

    #[error("Client is disconnected")]
    Disconnected,

    #[error("Invalid write: {0}")]
    InvalidWrite(String),

    #[error("Backend error: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// RtdbError: top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RtdbError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The backend was dropped before (or while) the operation ran.
    #[error("Backend was released before the operation completed")]
    BackendReleased,
}

/// Convenience alias: the default error type is `RtdbError`.
pub type Result<T, E = RtdbError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
