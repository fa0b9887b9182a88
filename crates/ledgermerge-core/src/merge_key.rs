//! Merge-key derivation.
//!
//! The store holds joined records under two disjoint key spaces: subject
//! references and account numbers. Which one a record lands in depends on the
//! kind that triggered the write:
//!
//! | Kind         | Merge key                         |
//! |--------------|-----------------------------------|
//! | Subject      | `subject.reference`               |
//! | Grouping     | `grouping.subject_reference`      |
//! | Account      | `account.account_number` (string) |
//! | Ledger entry | `entry.account_number` (string)   |
//!
//! A grouping is the only entity spanning both spaces: it is filed under its
//! subject but points at an account number.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{Account, Grouping, LedgerEntry, Subject};

/// The string a joined record is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeKey(String);

impl MergeKey {
    /// Wraps a raw key. Used by readers that already hold a key.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Key for a subject: its own reference.
    #[must_use]
    pub fn subject(subject: &Subject) -> Self {
        Self::subject_reference(&subject.reference)
    }

    /// Key for a subject reference.
    #[must_use]
    pub fn subject_reference(reference: &str) -> Self {
        Self(reference.to_string())
    }

    /// Key for a grouping: its owning subject's reference.
    ///
    /// Not the grouping's own reference, and not its account.
    #[must_use]
    pub fn grouping(grouping: &Grouping) -> Self {
        Self::subject_reference(&grouping.subject_reference)
    }

    /// Key for an account number.
    #[must_use]
    pub fn account(account_number: u64) -> Self {
        Self(account_number.to_string())
    }

    /// Key for an account row.
    #[must_use]
    pub fn for_account(account: &Account) -> Self {
        Self::account(account.account_number)
    }

    /// Key for a ledger entry: the owning account's number.
    #[must_use]
    pub fn ledger_entry(entry: &LedgerEntry) -> Self {
        Self::account(entry.account_number)
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MergeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
