//! The joined record: the only aggregate that is persisted.
//!
//! A joined record holds at most one subject, any number of groupings and any
//! number of accounts, each account carrying its own ledger entries. Entities
//! that have not arrived yet are represented by explicit partial variants
//! ([`SubjectState::Placeholder`], [`AccountState::Pending`]) rather than by
//! records with empty fields.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::merge_key::MergeKey;
use crate::record::{Account, Grouping, LedgerEntry, Subject};

/// The subject slot of a joined record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubjectState {
    /// The subject row has been reconciled.
    Complete(Subject),
    /// Only the reference is known; the subject row has not arrived yet.
    Placeholder {
        /// The subject reference the record is keyed by.
        reference: String,
    },
}

impl SubjectState {
    /// Returns the subject reference, whichever variant this is.
    #[must_use]
    pub fn reference(&self) -> &str {
        match self {
            Self::Complete(subject) => &subject.reference,
            Self::Placeholder { reference } => reference,
        }
    }

    /// Returns the full subject if it has arrived.
    #[must_use]
    pub fn as_complete(&self) -> Option<&Subject> {
        match self {
            Self::Complete(subject) => Some(subject),
            Self::Placeholder { .. } => None,
        }
    }

    /// Returns true for the placeholder variant.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }
}

/// An account together with its entries and computed balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    /// The account row as last delivered.
    #[serde(flatten)]
    pub account: Account,
    /// Ledger entries in arrival order.
    pub entries: Vec<LedgerEntry>,
    /// Running balance: cash balance plus the sum of entry amounts.
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    /// Bumped whenever a redelivered row changes the account's own fields.
    pub revision: u64,
    /// Commit sequence at the account key, bumped on every change to the
    /// view. Copies elsewhere are replaced only by a higher sequence.
    ///
    /// The value depends on arrival order (an absorbed bare entry record
    /// starts at 1), so it is not part of the logical state.
    #[serde(default)]
    pub seq: u64,
}

impl AccountView {
    /// Builds a view from a fresh account row and any entries filed before it.
    #[must_use]
    pub fn new(account: Account, entries: Vec<LedgerEntry>) -> Self {
        let mut view = Self {
            account,
            entries,
            balance: Decimal::ZERO,
            revision: 1,
            seq: 1,
        };
        view.recompute_balance();
        view
    }

    /// Recomputes [`AccountView::balance`] from the cash balance and entries.
    pub fn recompute_balance(&mut self) {
        self.balance = self
            .entries
            .iter()
            .fold(self.account.cash_balance, |acc, e| acc + e.amount);
    }

    /// Returns true if an entry with this reference is already present.
    #[must_use]
    pub fn has_entry(&self, reference: &str) -> bool {
        self.entries.iter().any(|e| e.reference == reference)
    }
}

/// The account slot of a joined record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccountState {
    /// The account row has been reconciled.
    Complete(AccountView),
    /// Entries filed before their account arrived.
    Pending {
        /// Number of the account the entries belong to.
        account_number: u64,
        /// Entries in arrival order.
        entries: Vec<LedgerEntry>,
    },
}

impl AccountState {
    /// Returns the account number, whichever variant this is.
    #[must_use]
    pub fn account_number(&self) -> u64 {
        match self {
            Self::Complete(view) => view.account.account_number,
            Self::Pending { account_number, .. } => *account_number,
        }
    }

    /// Returns the entries held by this slot.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        match self {
            Self::Complete(view) => &view.entries,
            Self::Pending { entries, .. } => entries,
        }
    }

    /// Returns the view if the account row has arrived.
    #[must_use]
    pub fn as_complete(&self) -> Option<&AccountView> {
        match self {
            Self::Complete(view) => Some(view),
            Self::Pending { .. } => None,
        }
    }
}

/// A denormalized record stored under a single merge key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedRecord {
    /// The key this record is stored under.
    pub merge_key: MergeKey,
    /// On account-keyed records: the lowest subject reference among the
    /// groupings filed against the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_reference: Option<String>,
    /// The subject, on subject-keyed records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectState>,
    /// Groupings, identified by their reference.
    #[serde(default)]
    pub groupings: Vec<Grouping>,
    /// Accounts, identified by account number.
    #[serde(default)]
    pub accounts: Vec<AccountState>,
    /// Fingerprints of every source record already applied at this key.
    #[serde(default)]
    pub applied: BTreeSet<String>,
}

impl JoinedRecord {
    /// Creates an empty record for the given key.
    #[must_use]
    pub fn empty(merge_key: MergeKey) -> Self {
        Self {
            merge_key,
            cross_reference: None,
            subject: None,
            groupings: Vec::new(),
            accounts: Vec::new(),
            applied: BTreeSet::new(),
        }
    }

    /// Returns the account slot for the given number, if present.
    #[must_use]
    pub fn account(&self, account_number: u64) -> Option<&AccountState> {
        self.accounts
            .iter()
            .find(|a| a.account_number() == account_number)
    }

    /// Returns the complete account view for the given number, if present.
    #[must_use]
    pub fn complete_account(&self, account_number: u64) -> Option<&AccountView> {
        self.account(account_number).and_then(AccountState::as_complete)
    }

    /// Returns the grouping with the given reference, if present.
    #[must_use]
    pub fn grouping(&self, reference: &str) -> Option<&Grouping> {
        self.groupings.iter().find(|g| g.reference == reference)
    }

    /// Returns the distinct subject references of all groupings, in filing order.
    #[must_use]
    pub fn grouping_subjects(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.groupings
            .iter()
            .filter(|g| seen.insert(g.subject_reference.as_str()))
            .map(|g| g.subject_reference.clone())
            .collect()
    }

    /// Returns true if any account slot is still a bare entry record.
    #[must_use]
    pub fn has_pending_entries(&self) -> bool {
        self.accounts
            .iter()
            .any(|a| matches!(a, AccountState::Pending { .. }))
    }

    /// Returns true if the given fingerprint was already applied here.
    #[must_use]
    pub fn was_applied(&self, fingerprint: &str) -> bool {
        self.applied.contains(fingerprint)
    }
}
