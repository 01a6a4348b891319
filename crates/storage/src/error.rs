//! Storage errors

use thiserror::Error;

/// Result type for blob store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Blob store failure
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object is stored at the key
    #[error("object '{key}' not found")]
    NotFound {
        /// The missing key
        key: String,
    },

    /// The caller may not access the object or container
    #[error("access to '{key}' denied: {reason}")]
    PermissionDenied {
        /// Key (or container) that was refused
        key: String,
        /// Backend-supplied reason
        reason: String,
    },

    /// The backend could not be reached or refused service
    #[error("storage unavailable: {reason}")]
    Unavailable {
        /// Backend-supplied reason
        reason: String,
    },

    /// The key cannot be represented by this backend
    #[error("invalid key '{key}'")]
    InvalidKey {
        /// The rejected key
        key: String,
    },

    /// Reading the object failed
    #[error("failed to read '{key}'")]
    Read {
        /// The key being read
        key: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing or removing the object failed
    #[error("failed to write '{key}'")]
    Write {
        /// The key being written
        key: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Create a not-found error for `key`
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Whether this error only means "nothing is stored there"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
