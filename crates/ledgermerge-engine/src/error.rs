//! Error types for reconciliation.

use std::time::Duration;

use ledgermerge_core::MergeKey;
use ledgermerge_core::record::RecordKind;
use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors that abort the reconciliation of a single record.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A lookup or write against the store failed.
    #[error("store error at key {key}: {source}")]
    Store {
        /// Key the failing operation targeted.
        key: MergeKey,
        /// The gateway error.
        #[source]
        source: ledgermerge_core::Error,
    },

    /// A store operation exceeded its deadline on every attempt.
    #[error("store {operation} at key {key} timed out after {after:?}")]
    Timeout {
        /// Key the operation targeted.
        key: MergeKey,
        /// Which gateway operation timed out.
        operation: &'static str,
        /// The per-operation deadline.
        after: Duration,
    },

    /// Concurrent writers kept winning the compare-and-swap race.
    #[error("lost CAS race at key {key} after {attempts} attempts")]
    Conflict {
        /// Contended key.
        key: MergeKey,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The incoming record could not be serialized for fingerprinting.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl ReconcileError {
    /// Returns true if reprocessing the record may succeed without operator action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Conflict { .. })
    }

    /// Returns the key involved, if any.
    #[must_use]
    pub fn key(&self) -> Option<&MergeKey> {
        match self {
            Self::Store { key, .. } | Self::Timeout { key, .. } | Self::Conflict { key, .. } => {
                Some(key)
            }
            Self::Serialization { .. } => None,
        }
    }
}

/// A batch stopped at its first failing record.
///
/// Records before `index` were applied and are not rolled back.
#[derive(Debug, Error)]
#[error("{kind} record {index} failed after {applied} records were applied: {source}")]
pub struct BatchError {
    /// Zero-based position of the failing record.
    pub index: usize,
    /// Number of records that landed before the failure.
    pub applied: usize,
    /// Kind of the failing record.
    pub kind: RecordKind,
    /// Why it failed.
    #[source]
    pub source: ReconcileError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_and_conflicts_are_retryable() {
        let key = MergeKey::account(42);
        assert!(
            ReconcileError::Conflict {
                key: key.clone(),
                attempts: 3
            }
            .is_retryable()
        );
        assert!(
            ReconcileError::Timeout {
                key: key.clone(),
                operation: "get",
                after: Duration::from_millis(1),
            }
            .is_retryable()
        );
        assert!(
            !ReconcileError::Store {
                key,
                source: ledgermerge_core::Error::storage("boom"),
            }
            .is_retryable()
        );
    }

    #[test]
    fn batch_error_names_position() {
        let err = BatchError {
            index: 2,
            applied: 2,
            kind: RecordKind::Account,
            source: ReconcileError::Conflict {
                key: MergeKey::account(7),
                attempts: 8,
            },
        };
        assert_eq!(
            err.to_string(),
            "account record 2 failed after 2 records were applied: lost CAS race at key 7 after 8 attempts"
        );
    }
}
