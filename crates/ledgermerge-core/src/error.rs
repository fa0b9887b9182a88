//! Error types and result aliases for ledgermerge.
//!
//! This module defines the shared error type used by the store gateway and
//! every crate built on top of it. Errors are structured for programmatic
//! handling and carry enough context to be logged on their own.

use std::time::Duration;

/// The result type used throughout ledgermerge.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core ledgermerge operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A store reported that an operation did not complete within its own
    /// deadline. Retryable, see [`Error::is_transient`].
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::storage_with_source("write failed", io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "storage error: write failed");
    }

    #[test]
    fn timeout_is_transient() {
        let err = Error::Timeout {
            operation: "get",
            after: Duration::from_millis(5),
        };
        assert!(err.is_transient());
        assert!(!Error::InvalidInput("x".into()).is_transient());
        assert!(!Error::storage("boom").is_transient());
    }
}
