//! Shared test utilities for ledgermerge integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryStore`]: In-memory joined store with operation recording
//!   and fault injection
//! - Factory functions for records and CSV batches
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use ledgermerge_test_utils::{TracingMemoryStore, account, assert_no_duplicate_entries};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = Arc::new(TracingMemoryStore::new());
//!     let reconciler = Reconciler::new(store.clone());
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ledgermerge=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
