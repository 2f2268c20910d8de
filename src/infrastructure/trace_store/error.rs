//! Error types for trace storage operations.

use thiserror::Error;

use crate::domain::DomainError;
use crate::infrastructure::trace_codec::CodecError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while storing or fetching trace objects.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object not found.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Invalid store specification (URL parsing failed).
    #[error("invalid store spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    /// A trajectory id or file name cannot form an object key.
    #[error("invalid key segment '{segment}': {reason}")]
    InvalidKey { segment: String, reason: String },

    /// Network or I/O error.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Encoding or decoding the trace file failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Generic error from the underlying object store.
    #[error("object store error: {0}")]
    ObjectStore(object_store::Error),
}

impl StoreError {
    /// Returns true if the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Create from an object_store error with context about the key.
    pub fn from_object_store(err: object_store::Error, key: &str) -> Self {
        match err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                key: key.to_string(),
            },
            other => StoreError::ObjectStore(other),
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::ObjectStore(err) => matches!(
                err,
                object_store::Error::Generic { .. } | object_store::Error::JoinError { .. }
            ),
            _ => false,
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        StoreError::from_object_store(err, "unknown")
    }
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidSpec { .. } => DomainError::Configuration(err.to_string()),
            StoreError::Codec(_) => DomainError::SerializationError(err.to_string()),
            _ => DomainError::Persistence(err.to_string()),
        }
    }
}
