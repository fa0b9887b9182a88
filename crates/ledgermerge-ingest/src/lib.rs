//! # ledgermerge-ingest
//!
//! Batch ingestion for ledgermerge.
//!
//! An upload of batch files to object storage produces a notification. This
//! crate turns that notification into reconciled records:
//!
//! - **Notification**: parses the event JSON and URL-decodes object keys
//! - **Kind dispatch**: the file-name prefix selects the record kind
//! - **Blob storage**: fetches the named objects ([`BlobStore`])
//! - **Record decoder**: CSV rows to typed records, by header name
//! - **Dispatcher**: feeds each decoded batch to the reconciler and reports
//!   failures to an [`ErrorSink`]
//!
//! ## Batch files
//!
//! | Prefix | Kind |
//! |--------|------|
//! | `clients` | subject |
//! | `portfolios` | grouping |
//! | `accounts` | account |
//! | `transactions` | ledger entry |
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledgermerge_core::MemoryStore;
//! use ledgermerge_engine::Reconciler;
//! use ledgermerge_ingest::{Dispatcher, MemoryBlobStore, Notification};
//!
//! let dispatcher = Dispatcher::new(
//!     Reconciler::new(Arc::new(MemoryStore::new())),
//!     Arc::new(MemoryBlobStore::new()),
//! );
//! let summary = dispatcher.handle(&Notification::parse(payload)?).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]

pub mod blob;
pub mod cli;
pub mod config;
pub mod decode;
pub mod dispatcher;
pub mod error;
pub mod error_sink;
pub mod notification;

pub use blob::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use config::IngestConfig;
pub use decode::{DecodedBatch, decode_batch};
pub use dispatcher::{DispatchSummary, Dispatcher, ObjectOutcome};
pub use error::{DecodeError, FetchError, IngestError, Result, UnknownKindError};
pub use error_sink::{
    ChannelErrorSink, ErrorSink, FailureReport, NoopErrorSink, TracingErrorSink,
};
pub use notification::{Notification, ObjectRef, kind_for_key};
