use std::fmt;

/// Failure reported by a [`DocumentStore`](crate::remote::DocumentStore) backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Listing, fetch or replace could not be completed (transport error,
    /// non-success status, payload rejected by the service).
    Unavailable(String),
    /// The named document does not exist in the collection.
    NotFound(String),
    /// A conditional replace saw a different collection revision.
    Conflict { expected: String, actual: String },
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Unavailable(msg) => write!(f, "remote store unavailable: {}", msg),
            RemoteError::NotFound(name) => write!(f, "remote document not found: {}", name),
            RemoteError::Conflict { expected, actual } => write!(
                f,
                "remote revision conflict (expected {}, actual {})",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Error type for [`ReadingsStore`](crate::ReadingsStore) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Any listing, fetch or replace failure. Nothing was committed.
    RemoteUnavailable(String),
    /// No shard exists yet.
    EmptyCatalog,
    /// Conditional replace kept conflicting after every retry.
    Conflict { expected: String, actual: String },
    /// A shard body could not be parsed into readings.
    MalformedShard {
        shard: String,
        line: usize,
        reason: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::RemoteUnavailable(msg) => write!(f, "remote unavailable: {}", msg),
            StoreError::EmptyCatalog => write!(f, "no shard exists yet"),
            StoreError::Conflict { expected, actual } => write!(
                f,
                "concurrent write detected (expected revision {}, got {})",
                expected, actual
            ),
            StoreError::MalformedShard {
                shard,
                line,
                reason,
            } => write!(f, "malformed shard {} at line {}: {}", shard, line, reason),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<RemoteError> for StoreError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Conflict { expected, actual } => StoreError::Conflict { expected, actual },
            other => StoreError::RemoteUnavailable(other.to_string()),
        }
    }
}
