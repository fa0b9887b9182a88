//! The reconciliation engine.
//!
//! For each incoming record the engine derives its merge key, reads whatever
//! partial state already exists under every key the record relates to, merges,
//! and writes a single joined record back.
//!
//! # Concurrency
//!
//! Independent invocations may reconcile overlapping keys at the same time.
//! Every single-key update is therefore a compare-and-swap cycle:
//!
//! 1. versioned `get`
//! 2. pure merge (see [`crate::merge`])
//! 3. `put` with `MatchesVersion` (or `DoesNotExist` for a fresh key)
//!
//! A lost race reruns the whole cycle on fresh state after a backoff. The
//! cycle is skipped entirely when the merge changes nothing.
//!
//! # Dual-key writes
//!
//! A logical merge may touch both key spaces, always account key first:
//!
//! | Arrival | Account key                    | Subject key(s)                            |
//! |---------|--------------------------------|-------------------------------------------|
//! | Subject | -                              | subject, keeping groupings and accounts   |
//! | Grouping| grouping cross-reference       | grouping + copy of the account if present |
//! | Account | account, absorbing bare entries| copy of the account, per filed grouping   |
//! | Entry   | entry (bare if no account yet) | copy of the account, per filed grouping   |
//!
//! Because the account key is committed first, whichever of a grouping and an
//! account (or entry) commits second sees the other and propagates the copy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ledgermerge_core::fingerprint::Fingerprint;
use ledgermerge_core::joined::JoinedRecord;
use ledgermerge_core::observability::reconcile_span;
use ledgermerge_core::record::{Account, Grouping, LedgerEntry, RecordKind, Subject};
use ledgermerge_core::store::{JoinedStore, RecordFilter, Versioned, WritePrecondition, WriteResult};
use ledgermerge_core::MergeKey;
use tracing::Instrument;

use crate::error::{BatchError, ReconcileError, Result};
use crate::merge;
use crate::metrics::{ReconcileTimer, record_cas_conflict, record_duplicate};
use crate::retry::Backoff;

/// Default per-operation store timeout.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of read-merge-write attempts per key.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Default first backoff delay after a lost race.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(20);

/// Default cap on backoff delays.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Tuning for the read-merge-write cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Deadline applied to every individual store call.
    pub store_timeout: Duration,
    /// Attempts per key before giving up with a conflict or timeout.
    pub max_attempts: u32,
    /// First backoff delay.
    pub backoff_base: Duration,
    /// Maximum backoff delay.
    pub backoff_max: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            store_timeout: DEFAULT_STORE_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

/// One decoded record of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingRecord {
    /// A subject row.
    Subject(Subject),
    /// A grouping row.
    Grouping(Grouping),
    /// An account row.
    Account(Account),
    /// A ledger entry row.
    LedgerEntry(LedgerEntry),
}

impl IncomingRecord {
    /// The record's kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Subject(_) => RecordKind::Subject,
            Self::Grouping(_) => RecordKind::Grouping,
            Self::Account(_) => RecordKind::Account,
            Self::LedgerEntry(_) => RecordKind::LedgerEntry,
        }
    }

    /// The primary merge key the record is filed under.
    #[must_use]
    pub fn merge_key(&self) -> MergeKey {
        match self {
            Self::Subject(s) => MergeKey::subject(s),
            Self::Grouping(g) => MergeKey::grouping(g),
            Self::Account(a) => MergeKey::for_account(a),
            Self::LedgerEntry(e) => MergeKey::ledger_entry(e),
        }
    }
}

impl From<Subject> for IncomingRecord {
    fn from(value: Subject) -> Self {
        Self::Subject(value)
    }
}

impl From<Grouping> for IncomingRecord {
    fn from(value: Grouping) -> Self {
        Self::Grouping(value)
    }
}

impl From<Account> for IncomingRecord {
    fn from(value: Account) -> Self {
        Self::Account(value)
    }
}

impl From<LedgerEntry> for IncomingRecord {
    fn from(value: LedgerEntry) -> Self {
        Self::LedgerEntry(value)
    }
}

/// What a single-key cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// The key did not exist and was created.
    Created,
    /// The stored record was replaced.
    Updated,
    /// The merge produced the stored record unchanged; nothing was written.
    Unchanged,
}

/// One key touched by a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWrite {
    /// The key.
    pub key: MergeKey,
    /// What happened to it.
    pub change: Change,
    /// Version after the cycle.
    pub version: String,
}

/// Result of reconciling one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Kind of the reconciled record.
    pub kind: RecordKind,
    /// Primary merge key.
    pub merge_key: MergeKey,
    /// True if the record had already been applied at its primary key.
    pub duplicate: bool,
    /// Every key written or checked, in order.
    pub writes: Vec<KeyWrite>,
}

/// Summary of a batch that reconciled completely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Per-record outcomes, in batch order.
    pub outcomes: Vec<ReconcileOutcome>,
}

impl BatchReport {
    /// Number of records reconciled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true if the batch was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of redelivered records that were no-ops.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.outcomes.iter().filter(|o| o.duplicate).count()
    }
}

struct Committed {
    record: JoinedRecord,
    write: KeyWrite,
}

/// Reconciles incoming records against a [`JoinedStore`].
pub struct Reconciler<S: JoinedStore + ?Sized> {
    store: Arc<S>,
    config: ReconcilerConfig,
}

// Arc<S> is Clone whether or not S is.
impl<S: JoinedStore + ?Sized> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: JoinedStore + ?Sized> Reconciler<S> {
    /// Creates a reconciler with the default configuration.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, ReconcilerConfig::default())
    }

    /// Creates a reconciler with an explicit configuration.
    #[must_use]
    pub fn with_config(store: Arc<S>, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Reconciles a batch strictly in order, stopping at the first failure.
    ///
    /// Records applied before the failure stay applied.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchError`] naming the failing record's position.
    pub async fn reconcile_batch(&self, records: &[IncomingRecord]) -> std::result::Result<BatchReport, BatchError> {
        let mut report = BatchReport::default();
        for (index, record) in records.iter().enumerate() {
            match self.reconcile(record).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(source) => {
                    tracing::error!(
                        index,
                        kind = record.kind().as_str(),
                        error = %source,
                        "batch aborted"
                    );
                    return Err(BatchError {
                        index,
                        applied: report.len(),
                        kind: record.kind(),
                        source,
                    });
                }
            }
        }
        tracing::info!(
            records = report.len(),
            duplicates = report.duplicates(),
            "batch reconciled"
        );
        Ok(report)
    }

    /// Reconciles one record of any kind.
    ///
    /// # Errors
    ///
    /// Returns an error if any store operation fails, times out on every
    /// attempt, or keeps losing the compare-and-swap race.
    pub async fn reconcile(&self, record: &IncomingRecord) -> Result<ReconcileOutcome> {
        let kind = record.kind();
        let span = reconcile_span(kind, &record.merge_key());
        let timer = ReconcileTimer::start(kind);

        let result = async {
            match record {
                IncomingRecord::Subject(s) => self.reconcile_subject(s).await,
                IncomingRecord::Grouping(g) => self.reconcile_grouping(g).await,
                IncomingRecord::Account(a) => self.reconcile_account(a).await,
                IncomingRecord::LedgerEntry(e) => self.reconcile_ledger_entry(e).await,
            }
        }
        .instrument(span)
        .await;

        timer.finish(result.is_ok());
        if let Ok(outcome) = &result {
            if outcome.duplicate {
                record_duplicate(kind);
            }
        }
        result
    }

    /// Subject arrival: fills the subject slot at its own reference.
    ///
    /// Groupings and account copies filed earlier under the same key are kept.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::reconcile`].
    pub async fn reconcile_subject(&self, subject: &Subject) -> Result<ReconcileOutcome> {
        let kind = RecordKind::Subject;
        let key = MergeKey::subject(subject);
        let fingerprint = fingerprint_of(subject)?;

        let committed = self
            .update(kind, &key, |existing| {
                merge::apply_subject(existing, &key, subject, &fingerprint)
            })
            .await?;

        Ok(ReconcileOutcome {
            kind,
            duplicate: is_duplicate(&committed, &fingerprint),
            merge_key: key,
            writes: vec![committed.write],
        })
    }

    /// Grouping arrival.
    ///
    /// Files the cross-reference under the account key first, then writes the
    /// grouping under its subject's key with a placeholder subject if needed
    /// and a copy of the account if it has already arrived.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::reconcile`].
    pub async fn reconcile_grouping(&self, grouping: &Grouping) -> Result<ReconcileOutcome> {
        let kind = RecordKind::Grouping;
        let fingerprint = fingerprint_of(grouping)?;

        let account_key = MergeKey::account(grouping.account_number);
        let account_side = self
            .update(kind, &account_key, |existing| {
                merge::file_grouping_under_account(existing, &account_key, grouping, &fingerprint)
            })
            .await?;
        let account = account_side
            .record
            .complete_account(grouping.account_number)
            .cloned();

        let subject_key = MergeKey::grouping(grouping);
        let subject_side = self
            .update(kind, &subject_key, |existing| {
                merge::apply_grouping(existing, &subject_key, grouping, &fingerprint, account.as_ref())
            })
            .await?;

        tracing::debug!(
            account_found = account.is_some(),
            "grouping filed under both key spaces"
        );

        Ok(ReconcileOutcome {
            kind,
            duplicate: is_duplicate(&subject_side, &fingerprint),
            merge_key: subject_key,
            writes: vec![account_side.write, subject_side.write],
        })
    }

    /// Account arrival.
    ///
    /// Absorbs entries filed before the account, then propagates the account to
    /// the key of every subject whose grouping points at it.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::reconcile`].
    pub async fn reconcile_account(&self, account: &Account) -> Result<ReconcileOutcome> {
        let kind = RecordKind::Account;
        let key = MergeKey::for_account(account);
        let fingerprint = fingerprint_of(account)?;

        let committed = self
            .update(kind, &key, |existing| {
                merge::apply_account(existing, &key, account, &fingerprint)
            })
            .await?;

        let duplicate = is_duplicate(&committed, &fingerprint);
        let mut writes = vec![committed.write.clone()];
        writes.extend(
            self.fan_out(kind, &committed.record, account.account_number)
                .await?,
        );

        Ok(ReconcileOutcome {
            kind,
            merge_key: key,
            duplicate,
            writes,
        })
    }

    /// Ledger entry arrival.
    ///
    /// Appends to the account's entries at the account key, or files a bare
    /// entry record there if the account has not arrived. When the account is
    /// present the updated account is propagated to every linked subject key.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::reconcile`].
    pub async fn reconcile_ledger_entry(&self, entry: &LedgerEntry) -> Result<ReconcileOutcome> {
        let kind = RecordKind::LedgerEntry;
        let key = MergeKey::ledger_entry(entry);
        let fingerprint = fingerprint_of(entry)?;

        let committed = self
            .update(kind, &key, |existing| {
                merge::apply_entry(existing, &key, entry, &fingerprint)
            })
            .await?;

        let duplicate = is_duplicate(&committed, &fingerprint);
        let mut writes = vec![committed.write.clone()];
        writes.extend(
            self.fan_out(kind, &committed.record, entry.account_number)
                .await?,
        );

        Ok(ReconcileOutcome {
            kind,
            merge_key: key,
            duplicate,
            writes,
        })
    }

    /// Point lookup of a joined record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails or times out.
    pub async fn lookup(&self, key: &MergeKey) -> Result<Option<JoinedRecord>> {
        let read = self.timed("get", key, self.store.get(key)).await?;
        Ok(read.map(|v| v.value))
    }

    /// Filtered lookup within one partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails or times out.
    pub async fn lookup_with(
        &self,
        key: &MergeKey,
        filter: &RecordFilter,
    ) -> Result<Vec<JoinedRecord>> {
        let hits = self
            .timed("query", key, self.store.query(key, filter))
            .await?;
        Ok(hits.into_iter().map(|v| v.value).collect())
    }

    /// Copies the account's committed state to every subject linked to it.
    async fn fan_out(
        &self,
        kind: RecordKind,
        account_record: &JoinedRecord,
        account_number: u64,
    ) -> Result<Vec<KeyWrite>> {
        let Some(view) = account_record.complete_account(account_number) else {
            return Ok(Vec::new());
        };

        let mut writes = Vec::new();
        for subject_reference in account_record.grouping_subjects() {
            let key = MergeKey::subject_reference(&subject_reference);
            let committed = self
                .update(kind, &key, |existing| {
                    merge::apply_account_copy(existing, &key, &subject_reference, view)
                })
                .await?;
            writes.push(committed.write);
        }
        if !writes.is_empty() {
            tracing::debug!(
                account_number,
                subjects = writes.len(),
                "propagated account to subject keys"
            );
        }
        Ok(writes)
    }

    /// Runs one compare-and-swap read-merge-write cycle on `key`.
    async fn update<F>(&self, kind: RecordKind, key: &MergeKey, merge: F) -> Result<Committed>
    where
        F: Fn(Option<JoinedRecord>) -> JoinedRecord,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max);
        // A timed-out put may still have landed; a later no-op merge is then
        // this call's own write, not a redelivery.
        let mut put_timed_out = false;
        let mut existed_at_first_read = None;

        for attempt in 1..=max_attempts {
            let read = match self.timed("get", key, self.store.get(key)).await {
                Ok(read) => read,
                Err(ReconcileError::Timeout { .. }) if attempt < max_attempts => {
                    tracing::warn!(key = %key, attempt, "store get timed out; retrying");
                    backoff.wait().await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let (existing, version) = match read {
                Some(Versioned { value, version }) => (Some(value), Some(version)),
                None => (None, None),
            };

            let existed = *existed_at_first_read.get_or_insert(existing.is_some());

            let merged = merge(existing.clone());
            if let (Some(current), Some(version)) = (&existing, &version) {
                if *current == merged {
                    let change = match (put_timed_out, existed) {
                        (false, _) => Change::Unchanged,
                        (true, true) => Change::Updated,
                        (true, false) => Change::Created,
                    };
                    tracing::debug!(key = %key, ?change, "merge produced no change; skipping write");
                    return Ok(Committed {
                        record: merged,
                        write: KeyWrite {
                            key: key.clone(),
                            change,
                            version: version.clone(),
                        },
                    });
                }
            }

            let precondition = WritePrecondition::for_read(version.as_deref());
            let written = match self
                .timed("put", key, self.store.put(key, &merged, precondition))
                .await
            {
                Ok(written) => written,
                Err(ReconcileError::Timeout { .. }) if attempt < max_attempts => {
                    // The write may or may not have landed; the next read decides.
                    put_timed_out = true;
                    tracing::warn!(key = %key, attempt, "store put timed out; retrying");
                    backoff.wait().await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match written {
                WriteResult::Success { version: new_version } => {
                    tracing::debug!(key = %key, version = %new_version, attempt, "record written");
                    let change = if existing.is_some() {
                        Change::Updated
                    } else {
                        Change::Created
                    };
                    return Ok(Committed {
                        record: merged,
                        write: KeyWrite {
                            key: key.clone(),
                            change,
                            version: new_version,
                        },
                    });
                }
                WriteResult::PreconditionFailed { current_version } => {
                    record_cas_conflict(kind);
                    tracing::warn!(
                        key = %key,
                        attempt,
                        current_version = %current_version,
                        "lost CAS race; retrying from fresh state"
                    );
                    if attempt < max_attempts {
                        backoff.wait().await;
                    }
                }
            }
        }

        Err(ReconcileError::Conflict {
            key: key.clone(),
            attempts: max_attempts,
        })
    }

    /// Applies the store timeout to one gateway call.
    async fn timed<T>(
        &self,
        operation: &'static str,
        key: &MergeKey,
        fut: impl Future<Output = ledgermerge_core::Result<T>>,
    ) -> Result<T> {
        let after = self.config.store_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) if source.is_transient() => Err(ReconcileError::Timeout {
                key: key.clone(),
                operation,
                after,
            }),
            Err(_) => Err(ReconcileError::Timeout {
                key: key.clone(),
                operation,
                after,
            }),
            Ok(Err(source)) => Err(ReconcileError::Store {
                key: key.clone(),
                source,
            }),
        }
    }
}

fn fingerprint_of<T: Fingerprint>(record: &T) -> Result<String> {
    record
        .fingerprint()
        .map_err(|e| ReconcileError::Serialization {
            message: e.to_string(),
        })
}

fn is_duplicate(committed: &Committed, fingerprint: &str) -> bool {
    committed.write.change == Change::Unchanged && committed.record.was_applied(fingerprint)
}
