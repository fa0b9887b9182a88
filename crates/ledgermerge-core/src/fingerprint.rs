//! Content-derived record identities.
//!
//! A fingerprint has the form `<kind>:<natural id>:<digest>`, where the digest
//! is the first 16 hex characters of the SHA-256 of the record's canonical
//! JSON. Two deliveries of the same physical row produce the same fingerprint;
//! a corrected row with the same natural id does not.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::record::{Account, Grouping, LedgerEntry, RecordKind, Subject};

const DIGEST_HEX_LEN: usize = 16;

/// Types that can be fingerprinted for redelivery detection.
pub trait Fingerprint: Serialize {
    /// The record's kind.
    const KIND: RecordKind;

    /// The identity of the record within its kind.
    fn natural_id(&self) -> String;

    /// Computes the fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        let digest = hex::encode(Sha256::digest(&canonical));
        Ok(format!(
            "{}:{}:{}",
            Self::KIND.as_str(),
            self.natural_id(),
            &digest[..DIGEST_HEX_LEN]
        ))
    }
}

impl Fingerprint for Subject {
    const KIND: RecordKind = RecordKind::Subject;

    fn natural_id(&self) -> String {
        self.reference.clone()
    }
}

impl Fingerprint for Grouping {
    const KIND: RecordKind = RecordKind::Grouping;

    fn natural_id(&self) -> String {
        self.reference.clone()
    }
}

impl Fingerprint for Account {
    const KIND: RecordKind = RecordKind::Account;

    fn natural_id(&self) -> String {
        self.account_number.to_string()
    }
}

impl Fingerprint for LedgerEntry {
    const KIND: RecordKind = RecordKind::LedgerEntry;

    fn natural_id(&self) -> String {
        self.reference.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn subject() -> Subject {
        Subject {
            record_id: 3,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            reference: "S-1".into(),
            tax_free_allowance: dec!(801.00),
        }
    }

    #[test]
    fn same_row_same_fingerprint() {
        let a = subject().fingerprint().unwrap();
        let b = subject().fingerprint().unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("subject:S-1:"));
        assert_eq!(a.len(), "subject:S-1:".len() + DIGEST_HEX_LEN);
    }

    #[test]
    fn corrected_row_changes_digest_not_identity() {
        let mut corrected = subject();
        corrected.last_name = "King".into();
        let original = subject().fingerprint().unwrap();
        let updated = corrected.fingerprint().unwrap();
        assert_ne!(original, updated);
        assert_eq!(corrected.natural_id(), subject().natural_id());
    }
}
