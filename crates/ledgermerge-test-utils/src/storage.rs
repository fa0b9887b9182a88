//! Test store implementation with operation tracing.
//!
//! Provides an in-memory joined store that records all operations and can be
//! told to fail, hang, lose compare-and-swap races, or apply a write and then
//! hang before acknowledging it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ledgermerge_core::error::{Error, Result};
use ledgermerge_core::joined::JoinedRecord;
use ledgermerge_core::merge_key::MergeKey;
use ledgermerge_core::store::{
    JoinedStore, MemoryStore, RecordFilter, Versioned, WritePrecondition, WriteResult,
};

/// Record of a store operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Point read.
    Get {
        /// Key that was read.
        key: String,
    },
    /// Filtered partition read.
    Query {
        /// Partition that was queried.
        key: String,
    },
    /// Write attempt (recorded whether or not the precondition held).
    Put {
        /// Key that was written.
        key: String,
        /// Precondition used.
        precondition: WritePrecondition,
    },
}

impl StoreOp {
    /// The key the operation targeted.
    pub fn key(&self) -> &str {
        match self {
            Self::Get { key } | Self::Query { key } | Self::Put { key, .. } => key,
        }
    }

    /// Returns true for writes.
    pub fn is_put(&self) -> bool {
        matches!(self, Self::Put { .. })
    }
}

/// In-memory joined store with operation tracing and fault injection.
///
/// Versioning and serialization are delegated to [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryStore {
    inner: MemoryStore,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_keys: Arc<Mutex<Vec<String>>>,
    hang_keys: Arc<Mutex<Vec<String>>>,
    lost_ack_keys: Arc<Mutex<Vec<String>>>,
    forced_conflicts: Arc<AtomicU32>,
    latency: Option<Duration>,
}

impl TracingMemoryStore {
    /// Creates a new empty tracing store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with simulated latency on every operation.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns the recorded writes only.
    #[must_use]
    pub fn puts(&self) -> Vec<StoreOp> {
        self.operations().into_iter().filter(StoreOp::is_put).collect()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Makes every operation on keys starting with `prefix` fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_keys.lock().expect("lock").push(prefix.into());
    }

    /// Makes every operation on keys starting with `prefix` never complete.
    pub fn inject_hang(&self, prefix: impl Into<String>) {
        self.hang_keys.lock().expect("lock").push(prefix.into());
    }

    /// Makes the next write on a key starting with `prefix` land in the store
    /// and then never complete. Single-shot per call.
    pub fn inject_lost_ack(&self, prefix: impl Into<String>) {
        self.lost_ack_keys.lock().expect("lock").push(prefix.into());
    }

    /// Makes the next `count` writes report a lost compare-and-swap race.
    pub fn inject_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Clears all injected faults.
    pub fn clear_failures(&self) {
        self.fail_keys.lock().expect("lock").clear();
        self.hang_keys.lock().expect("lock").clear();
        self.lost_ack_keys.lock().expect("lock").clear();
        self.forced_conflicts.store(0, Ordering::SeqCst);
    }

    /// Returns every stored key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<MergeKey> {
        self.inner.keys().expect("keys")
    }

    /// Returns the current version for a key (for CAS testing).
    pub async fn version(&self, key: &MergeKey) -> Option<String> {
        self.inner.get(key).await.expect("get").map(|v| v.version)
    }

    /// Reads a record without recording the operation.
    pub async fn peek(&self, key: &MergeKey) -> Option<JoinedRecord> {
        self.inner.get(key).await.expect("get").map(|v| v.value)
    }

    fn record(&self, op: StoreOp) {
        self.operations.lock().expect("lock").push(op);
    }

    async fn check_faults(&self, key: &MergeKey) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let hangs = self
            .hang_keys
            .lock()
            .expect("lock")
            .iter()
            .any(|p| key.as_str().starts_with(p.as_str()));
        if hangs {
            std::future::pending::<()>().await;
        }

        let fail_keys = self.fail_keys.lock().expect("lock");
        if fail_keys.iter().any(|p| key.as_str().starts_with(p.as_str())) {
            return Err(Error::storage(format!("Injected failure for key: {key}")));
        }
        Ok(())
    }

    fn take_lost_ack(&self, key: &MergeKey) -> bool {
        let mut prefixes = self.lost_ack_keys.lock().expect("lock");
        match prefixes.iter().position(|p| key.as_str().starts_with(p.as_str())) {
            Some(idx) => {
                prefixes.remove(idx);
                true
            }
            None => false,
        }
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JoinedStore for TracingMemoryStore {
    async fn get(&self, key: &MergeKey) -> Result<Option<Versioned<JoinedRecord>>> {
        self.check_faults(key).await?;
        self.record(StoreOp::Get {
            key: key.to_string(),
        });
        self.inner.get(key).await
    }

    async fn query(
        &self,
        key: &MergeKey,
        filter: &RecordFilter,
    ) -> Result<Vec<Versioned<JoinedRecord>>> {
        self.check_faults(key).await?;
        self.record(StoreOp::Query {
            key: key.to_string(),
        });
        self.inner.query(key, filter).await
    }

    async fn put(
        &self,
        key: &MergeKey,
        record: &JoinedRecord,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.check_faults(key).await?;
        self.record(StoreOp::Put {
            key: key.to_string(),
            precondition: precondition.clone(),
        });

        if self.take_forced_conflict() {
            let current_version = self
                .inner
                .get(key)
                .await?
                .map_or_else(|| "0".to_string(), |v| v.version);
            return Ok(WriteResult::PreconditionFailed { current_version });
        }

        let written = self.inner.put(key, record, precondition).await?;
        if matches!(written, WriteResult::Success { .. }) && self.take_lost_ack(key) {
            std::future::pending::<()>().await;
        }
        Ok(written)
    }
}
