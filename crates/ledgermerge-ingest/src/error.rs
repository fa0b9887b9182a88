//! Error types for ingestion.

use ledgermerge_core::record::RecordKind;
use ledgermerge_engine::ReconcileError;
use thiserror::Error;

/// Result type alias for ingestion.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that abort the handling of a notification.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A batch file could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A batch file could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A decoded record could not be reconciled.
    #[error("reconciling {object_key} failed at row {row}: {source}")]
    Reconcile {
        /// Object the record came from.
        object_key: String,
        /// One-based data row of the failing record.
        row: usize,
        /// Why reconciliation failed.
        #[source]
        source: ReconcileError,
    },

    /// An object key does not name a known record kind.
    #[error(transparent)]
    UnknownKind(#[from] UnknownKindError),

    /// The notification payload is malformed or empty.
    #[error("invalid notification: {message}")]
    InvalidNotification {
        /// What is wrong with it.
        message: String,
    },
}

impl IngestError {
    /// Creates an invalid-notification error.
    #[must_use]
    pub fn invalid_notification(message: impl Into<String>) -> Self {
        Self::InvalidNotification {
            message: message.into(),
        }
    }

    /// Returns true if redelivering the notification may succeed.
    ///
    /// Decoding and kind errors are permanent; fetch I/O errors, store timeouts
    /// and lost races are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Reconcile { source, .. } => source.is_retryable(),
            Self::Fetch(FetchError::Io { .. }) => true,
            Self::Decode(_)
            | Self::Fetch(_)
            | Self::UnknownKind(_)
            | Self::InvalidNotification { .. } => false,
        }
    }
}

/// A batch file is not a well-formed batch of its kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} batch at row {row}{}: {message}", column_suffix(.column.as_deref()))]
pub struct DecodeError {
    /// Kind the batch was decoded as.
    pub kind: RecordKind,
    /// One-based data row; `0` for the header.
    pub row: usize,
    /// Offending column, when known.
    pub column: Option<String>,
    /// What is wrong.
    pub message: String,
}

fn column_suffix(column: Option<&str>) -> String {
    column.map(|c| format!(", column {c}")).unwrap_or_default()
}

/// A batch file could not be read from blob storage.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No object at that key.
    #[error("object {container}/{key} not found")]
    NotFound {
        /// Container (bucket) name.
        container: String,
        /// Object key.
        key: String,
    },

    /// The object exists but may not be read.
    #[error("access to {container}/{key} denied")]
    AccessDenied {
        /// Container (bucket) name.
        container: String,
        /// Object key.
        key: String,
    },

    /// Any other I/O failure.
    #[error("reading {container}/{key} failed: {source}")]
    Io {
        /// Container (bucket) name.
        container: String,
        /// Object key.
        key: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// An object key's file-name prefix is not one of the four batch kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("object {object_key} has unknown batch prefix '{prefix}'")]
pub struct UnknownKindError {
    /// The full object key.
    pub object_key: String,
    /// The prefix that did not match.
    pub prefix: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_names_row_and_column() {
        let err = DecodeError {
            kind: RecordKind::Account,
            row: 3,
            column: Some("cash_balance".into()),
            message: "invalid decimal".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid account batch at row 3, column cash_balance: invalid decimal"
        );

        let header = DecodeError {
            column: None,
            row: 0,
            ..err
        };
        assert_eq!(
            header.to_string(),
            "invalid account batch at row 0: invalid decimal"
        );
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        let unknown = IngestError::from(UnknownKindError {
            object_key: "invoices_1.csv".into(),
            prefix: "invoices".into(),
        });
        assert!(!unknown.is_retryable());

        let io = IngestError::from(FetchError::Io {
            container: "b".into(),
            key: "k".into(),
            source: std::io::Error::other("reset"),
        });
        assert!(io.is_retryable());
    }
}
