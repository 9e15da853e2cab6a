//! Error types for the provd broker.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for provd operations.
pub type ProvResult<T> = Result<T, ProvError>;

/// Errors that can occur inside the broker, its adapters, or its stores.
#[derive(Error, Debug)]
pub enum ProvError {
    /// Operation called outside of a valid session state.
    #[error("operation not valid in the current session state")]
    Unexpected,

    /// Operation cancelled by shutdown or preemption.
    #[error("operation cancelled")]
    Cancelled,

    /// A key, context or backend object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request arguments.
    #[error("bad arguments: {0}")]
    BadArgs(String),

    /// Key is well formed but not part of the adapter's schema.
    #[error("bad key: {0}")]
    BadKey(String),

    /// Key recognised but the operation is disallowed.
    #[error("denied: {0}")]
    Denied(String),

    /// Internal invariant violated.
    #[error("corrupt state: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error in a persisted store.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying middleware call failed.
    #[error("subsystem error: {0}")]
    Subsystem(String),
}

impl ProvError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates a bad-key error.
    pub fn bad_key(key: impl Into<String>) -> Self {
        Self::BadKey(key.into())
    }

    /// Creates a denied error.
    pub fn denied(what: impl Into<String>) -> Self {
        Self::Denied(what.into())
    }

    /// Creates a subsystem error.
    pub fn subsystem(message: impl Into<String>) -> Self {
        Self::Subsystem(message.into())
    }

    /// Returns true if this error reports a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProvError::Cancelled)
    }

    /// Returns the user-visible classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvError::Unexpected => ErrorKind::Unexpected,
            ProvError::Cancelled => ErrorKind::Cancelled,
            ProvError::NotFound(_) => ErrorKind::NotFound,
            ProvError::BadArgs(_) | ProvError::BadKey(_) => ErrorKind::BadArgs,
            ProvError::Denied(_)
            | ProvError::Corrupt(_)
            | ProvError::Io(_)
            | ProvError::Serialization(_)
            | ProvError::Subsystem(_) => ErrorKind::Unknown,
        }
    }
}

/// Error kinds reported to clients. Carries no internal detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Call made outside of a session, or a repeated Start.
    Unexpected,
    /// Operation cancelled.
    Cancelled,
    /// Requested key does not exist.
    NotFound,
    /// Invalid key or arguments.
    BadArgs,
    /// Any other failure.
    Unknown,
}

impl ErrorKind {
    /// Returns the stable name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::BadArgs => "BadArgs",
            ErrorKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
