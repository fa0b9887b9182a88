//! Upload notifications.
//!
//! An upload of one or more batch files to object storage produces a
//! notification listing `(container, object key)` pairs. Nothing is listed:
//! every object to process is named explicitly.
//!
//! # Wire shape
//!
//! ```json
//! {"Records": [{"s3": {"bucket": {"name": "inbox"}, "object": {"key": "clients_2024.csv"}}}]}
//! ```
//!
//! Object keys arrive URL-encoded (`+` for space, `%xx` escapes) and are
//! decoded on parse.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use ledgermerge_core::record::RecordKind;

use crate::error::{IngestError, UnknownKindError};

/// Default separator between a batch file's kind prefix and the rest of its name.
pub const DEFAULT_KIND_SEPARATOR: char = '_';

/// One uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Container (bucket) name.
    pub container: String,
    /// Decoded object key.
    pub key: String,
}

impl ObjectRef {
    /// Creates a reference to an object.
    #[must_use]
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }
}

/// A parsed upload notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    objects: Vec<ObjectRef>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Records", default)]
    records: Vec<EventRecord>,
}

#[derive(Deserialize)]
struct EventRecord {
    s3: EventEntity,
}

#[derive(Deserialize)]
struct EventEntity {
    bucket: Named,
    object: Keyed,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct Keyed {
    key: String,
}

impl Notification {
    /// Creates a notification for the given objects.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::InvalidNotification` if `objects` is empty.
    pub fn new(objects: Vec<ObjectRef>) -> Result<Self, IngestError> {
        if objects.is_empty() {
            return Err(IngestError::invalid_notification("no objects"));
        }
        Ok(Self { objects })
    }

    /// Parses the object-storage event JSON.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::InvalidNotification` for malformed JSON, an empty
    /// record list, or a key that is not valid percent-encoded UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Self, IngestError> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| IngestError::invalid_notification(e.to_string()))?;

        let objects = envelope
            .records
            .into_iter()
            .map(|r| {
                Ok(ObjectRef {
                    container: r.s3.bucket.name,
                    key: decode_key(&r.s3.object.key)?,
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        Self::new(objects)
    }

    /// The objects, in notification order.
    #[must_use]
    pub fn objects(&self) -> &[ObjectRef] {
        &self.objects
    }
}

/// Decodes a URL-encoded object key.
///
/// # Errors
///
/// Returns `IngestError::InvalidNotification` if the decoded bytes are not UTF-8.
pub fn decode_key(raw: &str) -> Result<String, IngestError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| IngestError::invalid_notification(format!("object key '{raw}': {e}")))
}

/// Resolves the record kind of a batch file from its object key.
///
/// The kind is the file name's prefix before the first `separator`; any
/// directory part of the key is ignored. A file name without the separator is
/// taken whole (minus its extension).
///
/// # Errors
///
/// Returns [`UnknownKindError`] if the prefix is not a known kind.
pub fn kind_for_key(object_key: &str, separator: char) -> Result<RecordKind, UnknownKindError> {
    let file_name = object_key.rsplit('/').next().unwrap_or(object_key);
    let prefix = match file_name.split_once(separator) {
        Some((prefix, _)) => prefix,
        None => file_name.split('.').next().unwrap_or(file_name),
    };

    RecordKind::from_prefix(prefix).ok_or_else(|| UnknownKindError {
        object_key: object_key.to_string(),
        prefix: prefix.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_json_and_decodes_keys() {
        let payload = br#"{
            "Records": [
                {"s3": {"bucket": {"name": "inbox"}, "object": {"key": "accounts_2024+Q1%2Bfinal.csv"}}},
                {"s3": {"bucket": {"name": "inbox"}, "object": {"key": "daily/clients_1.csv"}}}
            ]
        }"#;
        let notification = Notification::parse(payload).unwrap();
        assert_eq!(
            notification.objects(),
            [
                ObjectRef::new("inbox", "accounts_2024 Q1+final.csv"),
                ObjectRef::new("inbox", "daily/clients_1.csv"),
            ]
        );
    }

    #[test]
    fn empty_notification_is_invalid() {
        assert!(matches!(
            Notification::parse(br#"{"Records": []}"#),
            Err(IngestError::InvalidNotification { .. })
        ));
        assert!(matches!(
            Notification::parse(b"{}"),
            Err(IngestError::InvalidNotification { .. })
        ));
        assert!(matches!(
            Notification::parse(b"not json"),
            Err(IngestError::InvalidNotification { .. })
        ));
    }

    #[test]
    fn kind_comes_from_file_name_prefix() {
        assert_eq!(
            kind_for_key("clients_2024-01-01.csv", '_'),
            Ok(RecordKind::Subject)
        );
        assert_eq!(
            kind_for_key("exports/2024/transactions_001.csv", '_'),
            Ok(RecordKind::LedgerEntry)
        );
        assert_eq!(kind_for_key("portfolios.csv", '_'), Ok(RecordKind::Grouping));
        assert_eq!(kind_for_key("accounts-7.csv", '-'), Ok(RecordKind::Account));
    }

    #[test]
    fn unknown_prefix_is_reported() {
        let err = kind_for_key("in/invoices_1.csv", '_').unwrap_err();
        assert_eq!(err.prefix, "invoices");
        assert_eq!(err.object_key, "in/invoices_1.csv");
    }
}
