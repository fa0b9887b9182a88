//! # ledgermerge-engine
//!
//! Reconciles back-office records that arrive in any order into joined
//! records.
//!
//! Four kinds of record reference each other: subjects own groupings,
//! groupings point at accounts, and ledger entries move accounts. Each kind
//! arrives on its own, possibly before the records it refers to. The engine
//! files every arrival under the right merge key and keeps both key spaces
//! consistent:
//!
//! - **Subject key** (the subject reference): the subject, its groupings and a
//!   copy of every account those groupings point at
//! - **Account key** (the account number): the account, its entries and the
//!   groupings that point at it
//!
//! ## Guarantees
//!
//! - The same set of records produces the same joined records whatever the
//!   arrival order
//! - Redelivering a record is a no-op
//! - Concurrent writers never lose each other's updates (compare-and-swap
//!   with bounded retry)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledgermerge_core::{MemoryStore, MergeKey};
//! use ledgermerge_engine::{IncomingRecord, Reconciler};
//!
//! let reconciler = Reconciler::new(Arc::new(MemoryStore::new()));
//! reconciler.reconcile_batch(&records).await?;
//!
//! let joined = reconciler.lookup(&MergeKey::subject_reference("S-1")).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod merge;
pub mod metrics;
pub mod reconciler;
pub mod retry;

pub use error::{BatchError, ReconcileError, Result};
pub use reconciler::{
    BatchReport, Change, IncomingRecord, KeyWrite, ReconcileOutcome, Reconciler, ReconcilerConfig,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{BatchError, ReconcileError};
    pub use crate::reconciler::{IncomingRecord, ReconcileOutcome, Reconciler, ReconcilerConfig};
}
