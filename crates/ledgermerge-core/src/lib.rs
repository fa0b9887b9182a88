//! # ledgermerge-core
//!
//! Core abstractions for reconciling out-of-order back-office batches into
//! joined records.
//!
//! This crate provides the types every other ledgermerge crate shares:
//!
//! - **Records**: the four source kinds ([`Subject`], [`Grouping`], [`Account`], [`LedgerEntry`])
//! - **Joined records**: the persisted aggregate and its partial variants
//! - **Merge keys**: derivation of the key each kind is filed under
//! - **Fingerprints**: content-derived identities for redelivery detection
//! - **Store gateway**: the [`JoinedStore`] contract with memory and directory backends
//! - **Error types**: shared error definitions and result types
//!
//! ## Example
//!
//! ```rust
//! use ledgermerge_core::prelude::*;
//!
//! let key = MergeKey::account(42);
//! let record = JoinedRecord::empty(key.clone());
//! assert_eq!(record.merge_key.as_str(), "42");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod directory_store;
pub mod error;
pub mod fingerprint;
pub mod joined;
pub mod merge_key;
pub mod observability;
pub mod record;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::directory_store::DirectoryStore;
    pub use crate::error::{Error, Result};
    pub use crate::fingerprint::Fingerprint;
    pub use crate::joined::{AccountState, AccountView, JoinedRecord, SubjectState};
    pub use crate::merge_key::MergeKey;
    pub use crate::record::{Account, Grouping, LedgerEntry, RecordKind, Subject};
    pub use crate::store::{
        Field, JoinedStore, MemoryStore, RecordFilter, Versioned, WritePrecondition, WriteResult,
    };
}

// Re-export key types at crate root for ergonomics
pub use directory_store::DirectoryStore;
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use joined::{AccountState, AccountView, JoinedRecord, SubjectState};
pub use merge_key::MergeKey;
pub use observability::{LogFormat, init_logging};
pub use record::{Account, Grouping, LedgerEntry, RecordKind, Subject};
pub use store::{
    Field, JoinedStore, MemoryStore, RecordFilter, Versioned, WritePrecondition, WriteResult,
};
