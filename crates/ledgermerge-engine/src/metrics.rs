//! Reconciliation metrics.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the hosting binary.

use std::time::Instant;

use ledgermerge_core::record::RecordKind;
use metrics::{counter, histogram};

/// Reconciled records, by kind.
pub const RECONCILE_TOTAL: &str = "reconcile_total";

/// Records whose reconciliation failed, by kind.
pub const RECONCILE_ERRORS_TOTAL: &str = "reconcile_errors_total";

/// Compare-and-swap writes that lost a race and were retried.
pub const RECONCILE_CAS_CONFLICTS_TOTAL: &str = "reconcile_cas_conflicts_total";

/// Redelivered records that were already applied.
pub const RECONCILE_DUPLICATES_TOTAL: &str = "reconcile_duplicates_total";

/// Time spent reconciling one record, including fan-out.
pub const RECONCILE_DURATION: &str = "reconcile_duration_seconds";

/// Records a CAS conflict.
pub fn record_cas_conflict(kind: RecordKind) {
    counter!(RECONCILE_CAS_CONFLICTS_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Records a redelivery that was a no-op.
pub fn record_duplicate(kind: RecordKind) {
    counter!(RECONCILE_DUPLICATES_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// RAII-style timer for one reconciliation.
pub struct ReconcileTimer {
    kind: RecordKind,
    start: Instant,
}

impl ReconcileTimer {
    /// Starts timing a reconciliation.
    #[must_use]
    pub fn start(kind: RecordKind) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }

    /// Stops the timer and records the outcome.
    pub fn finish(self, success: bool) {
        let labels = [("kind", self.kind.as_str())];
        histogram!(RECONCILE_DURATION, &labels).record(self.start.elapsed().as_secs_f64());
        if success {
            counter!(RECONCILE_TOTAL, &labels).increment(1);
        } else {
            counter!(RECONCILE_ERRORS_TOTAL, &labels).increment(1);
        }
    }
}
