//! Typed source records.
//!
//! These are the four record kinds that arrive in independent batches. They are
//! plain values: all joining happens in the engine, never here.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The four kinds of record the system ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A party identified by a stable reference.
    Subject,
    /// A named collection linking a subject to an account.
    Grouping,
    /// A monetary container identified by an account number.
    Account,
    /// A single movement against an account.
    LedgerEntry,
}

impl RecordKind {
    /// All kinds, in dependency order.
    pub const ALL: [Self; 4] = [
        Self::Subject,
        Self::Grouping,
        Self::Account,
        Self::LedgerEntry,
    ];

    /// Stable lowercase label, used in logs, metrics and fingerprints.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Grouping => "grouping",
            Self::Account => "account",
            Self::LedgerEntry => "ledger_entry",
        }
    }

    /// The object-key prefix that identifies a batch file of this kind.
    ///
    /// The names are those used by the upstream export.
    #[must_use]
    pub const fn file_prefix(self) -> &'static str {
        match self {
            Self::Subject => "clients",
            Self::Grouping => "portfolios",
            Self::Account => "accounts",
            Self::LedgerEntry => "transactions",
        }
    }

    /// Header columns a batch file of this kind must carry.
    #[must_use]
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Subject => &[
                "record_id",
                "first_name",
                "last_name",
                "client_reference",
                "tax_free_allowance",
            ],
            Self::Grouping => &[
                "record_id",
                "account_number",
                "portfolio_reference",
                "client_reference",
                "agent_code",
            ],
            Self::Account => &[
                "record_id",
                "account_number",
                "cash_balance",
                "currency",
                "taxes_paid",
            ],
            Self::LedgerEntry => &[
                "record_id",
                "account_number",
                "transaction_reference",
                "amount",
                "keyword",
            ],
        }
    }

    /// Resolves a kind from a file prefix, if it is one of the known four.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.file_prefix() == prefix)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A party, identified by its reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Source-assigned row identifier.
    pub record_id: u64,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Stable subject reference; the subject's merge key.
    #[serde(rename = "client_reference")]
    pub reference: String,
    /// Yearly tax-free allowance.
    #[serde(with = "rust_decimal::serde::str")]
    pub tax_free_allowance: Decimal,
}

/// A grouping owned by one subject and pointing at one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    /// Source-assigned row identifier.
    pub record_id: u64,
    /// Number of the account this grouping points to.
    pub account_number: u64,
    /// The grouping's own reference.
    #[serde(rename = "portfolio_reference")]
    pub reference: String,
    /// Reference of the owning subject.
    #[serde(rename = "client_reference")]
    pub subject_reference: String,
    /// Issuing agent code.
    pub agent_code: String,
}

/// An account row as delivered, without entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Source-assigned row identifier.
    pub record_id: u64,
    /// Account number; rendered as a string it is the account's merge key.
    pub account_number: u64,
    /// Cash balance at export time.
    #[serde(with = "rust_decimal::serde::str")]
    pub cash_balance: Decimal,
    /// ISO currency code.
    pub currency: String,
    /// Taxes paid on this account.
    #[serde(with = "rust_decimal::serde::str")]
    pub taxes_paid: Decimal,
}

/// A single movement against an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Source-assigned row identifier.
    pub record_id: u64,
    /// Number of the account this entry moves.
    pub account_number: u64,
    /// The entry's own reference.
    #[serde(rename = "transaction_reference")]
    pub reference: String,
    /// Signed amount.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    /// Free-text category.
    pub keyword: String,
}
