//! Key-value store gateway for joined records.
//!
//! The gateway is a single logical table with one string partition key (the
//! merge key) and three operations:
//! - point `get`
//! - `query` by partition key with a value filter
//! - `put` with an optional precondition
//!
//! The gateway has no merge semantics of its own; the engine owns all merging.
//! `put` accepts a [`WritePrecondition`] so the engine can run every
//! read-merge-write cycle as a compare-and-swap. [`WritePrecondition::None`]
//! is still available for an unconditional overwrite.
//!
//! ## Versions
//!
//! The version token is an opaque `String`. Backends may use a counter, an
//! `ETag` or a sequence number; callers only compare tokens for equality.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::joined::{AccountState, JoinedRecord};
use crate::merge_key::MergeKey;

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if no record exists at the key.
    DoesNotExist,
    /// Write only if the stored record's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

impl WritePrecondition {
    /// The precondition that protects an update of what was read.
    ///
    /// `None` read means the key was absent, so the write must create it.
    #[must_use]
    pub fn for_read(version: Option<&str>) -> Self {
        version.map_or(Self::DoesNotExist, |v| Self::MatchesVersion(v.to_string()))
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Write succeeded, returns the new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns the current version token.
    PreconditionFailed {
        /// The version that caused the precondition to fail (`"0"` if absent).
        current_version: String,
    },
}

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The decoded value.
    pub value: T,
    /// Opaque version token for CAS writes.
    pub version: String,
}

/// A top-level attribute of a joined record that filters can inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// The subject slot (complete or placeholder).
    Subject,
    /// The grouping list.
    Groupings,
    /// The account list.
    Accounts,
    /// Bare entry records awaiting their account.
    PendingEntries,
    /// The account-keyed cross-reference to a subject.
    CrossReference,
}

/// A filter evaluated against the values of a stored record.
///
/// Collections count as present when non-empty. Filters are evaluated on the
/// decoded record, not as a server-side expression over nested attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFilter {
    /// The field is set (or the collection is non-empty).
    Present(Field),
    /// The field is unset (or the collection is empty).
    Absent(Field),
    /// The field's scalar value equals the given string.
    ///
    /// For `Subject` this compares the subject reference; for collections it
    /// matches if any element's identity equals the value.
    Equals(Field, String),
    /// All inner filters match.
    All(Vec<RecordFilter>),
}

impl RecordFilter {
    /// Evaluates the filter against a record.
    #[must_use]
    pub fn matches(&self, record: &JoinedRecord) -> bool {
        match self {
            Self::Present(field) => is_present(record, *field),
            Self::Absent(field) => !is_present(record, *field),
            Self::Equals(field, value) => equals(record, *field, value),
            Self::All(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}

fn is_present(record: &JoinedRecord, field: Field) -> bool {
    match field {
        Field::Subject => record.subject.is_some(),
        Field::Groupings => !record.groupings.is_empty(),
        Field::Accounts => !record.accounts.is_empty(),
        Field::PendingEntries => record.has_pending_entries(),
        Field::CrossReference => record.cross_reference.is_some(),
    }
}

fn equals(record: &JoinedRecord, field: Field, value: &str) -> bool {
    match field {
        Field::Subject => record
            .subject
            .as_ref()
            .is_some_and(|s| s.reference() == value),
        Field::Groupings => record.groupings.iter().any(|g| g.reference == value),
        Field::Accounts => record
            .accounts
            .iter()
            .any(|a| a.account_number().to_string() == value),
        Field::PendingEntries => record.accounts.iter().any(|a| match a {
            AccountState::Pending { entries, .. } => entries.iter().any(|e| e.reference == value),
            AccountState::Complete(_) => false,
        }),
        Field::CrossReference => record.cross_reference.as_deref() == Some(value),
    }
}

/// Store gateway trait for joined records.
///
/// All backends (memory, directory, a managed key-value service) implement
/// this trait. Bounded timeouts are enforced by the caller, not the backend.
#[async_trait]
pub trait JoinedStore: Send + Sync + 'static {
    /// Reads the record at `key`.
    ///
    /// Returns `Ok(None)` if no record exists.
    async fn get(&self, key: &MergeKey) -> Result<Option<Versioned<JoinedRecord>>>;

    /// Reads the records in the partition `key` that match `filter`.
    ///
    /// The table has one item per partition, so the result has at most one
    /// element. Returns an empty vec if nothing matches.
    async fn query(
        &self,
        key: &MergeKey,
        filter: &RecordFilter,
    ) -> Result<Vec<Versioned<JoinedRecord>>> {
        Ok(self
            .get(key)
            .await?
            .into_iter()
            .filter(|item| filter.matches(&item.value))
            .collect())
    }

    /// Writes `record` at `key` with an optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if the precondition is not met.
    /// A failed precondition is a normal result, never an error.
    async fn put(
        &self,
        key: &MergeKey,
        record: &JoinedRecord,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;
}

/// Serializes a record into the stored item representation.
///
/// # Errors
///
/// Returns `Error::Serialization` if the record cannot be encoded.
pub fn encode_record(record: &JoinedRecord) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(record)?))
}

/// Deserializes a stored item.
///
/// # Errors
///
/// Returns `Error::Serialization` naming the key if the bytes are not a record.
pub fn decode_record(key: &MergeKey, data: &[u8]) -> Result<JoinedRecord> {
    serde_json::from_slice(data).map_err(|e| Error::Serialization {
        message: format!("decode record at {key}: {e}"),
    })
}

/// Checks a precondition against the currently stored version.
///
/// Returns `Some(current_version)` when the write must be rejected.
#[must_use]
pub fn check_precondition(precondition: &WritePrecondition, current: Option<i64>) -> Option<String> {
    match (precondition, current) {
        (WritePrecondition::None, _) | (WritePrecondition::DoesNotExist, None) => None,
        (WritePrecondition::DoesNotExist, Some(v)) => Some(v.to_string()),
        (WritePrecondition::MatchesVersion(expected), Some(v)) => {
            let expected_num: i64 = expected.parse().unwrap_or(-1);
            (expected_num != v).then(|| v.to_string())
        }
        (WritePrecondition::MatchesVersion(_), None) => Some("0".to_string()),
    }
}

/// In-memory store for tests and single-process runs.
///
/// Thread-safe via `RwLock`. Items are kept as encoded bytes so every read and
/// write goes through the same serialization as a remote store would.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    items: Arc<RwLock<HashMap<MergeKey, StoredItem>>>,
}

#[derive(Debug, Clone)]
struct StoredItem {
    data: Bytes,
    /// Numeric version stored as i64 internally, exposed as String via API.
    version: i64,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored key, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn keys(&self) -> Result<Vec<MergeKey>> {
        let items = self.items.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        let mut keys: Vec<_> = items.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl JoinedStore for MemoryStore {
    async fn get(&self, key: &MergeKey) -> Result<Option<Versioned<JoinedRecord>>> {
        let item = {
            let items = self.items.read().map_err(|_| Error::Internal {
                message: "lock poisoned".into(),
            })?;
            items.get(key).cloned()
        };

        item.map(|item| {
            Ok(Versioned {
                value: decode_record(key, &item.data)?,
                version: item.version.to_string(),
            })
        })
        .transpose()
    }

    async fn put(
        &self,
        key: &MergeKey,
        record: &JoinedRecord,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let data = encode_record(record)?;

        let mut items = self.items.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let current = items.get(key).map(|item| item.version);
        if let Some(current_version) = check_precondition(&precondition, current) {
            return Ok(WriteResult::PreconditionFailed { current_version });
        }

        let new_version = current.map_or(1, |v| v + 1);
        items.insert(
            key.clone(),
            StoredItem {
                data,
                version: new_version,
            },
        );
        drop(items);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }
}
