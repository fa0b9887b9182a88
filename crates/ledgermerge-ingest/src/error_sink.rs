//! Failure reporting.
//!
//! When handling a notification fails, a [`FailureReport`] is published to an
//! [`ErrorSink`] before the error is returned. Reporting is fire-and-forget:
//! a sink must never block or fail the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use ledgermerge_core::record::RecordKind;

/// Description of a failed object, for an operator or a dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Container (bucket) of the failing object.
    pub container: String,
    /// Key of the failing object.
    pub object_key: String,
    /// Kind of the batch, if it was resolved.
    pub kind: Option<RecordKind>,
    /// Rendered error.
    pub error: String,
    /// When the failure was observed.
    pub occurred_at: DateTime<Utc>,
}

/// Destination for failure reports.
pub trait ErrorSink: Send + Sync {
    /// Publishes a report. Must not block.
    fn report(&self, report: FailureReport);
}

/// Logs reports at `error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, report: FailureReport) {
        tracing::error!(
            container = %report.container,
            object_key = %report.object_key,
            kind = report.kind.map(RecordKind::as_str),
            error = %report.error,
            "batch failed"
        );
    }
}

/// Forwards reports into a bounded channel.
///
/// A full or closed channel drops the report.
#[derive(Debug, Clone)]
pub struct ChannelErrorSink {
    tx: mpsc::Sender<FailureReport>,
}

impl ChannelErrorSink {
    /// Creates a sink and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FailureReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ErrorSink for ChannelErrorSink {
    fn report(&self, report: FailureReport) {
        match self.tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(report)) => {
                tracing::warn!(object_key = %report.object_key, "error sink full; report dropped");
            }
            Err(TrySendError::Closed(report)) => {
                tracing::warn!(object_key = %report.object_key, "error sink closed; report dropped");
            }
        }
    }
}

/// Discards reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopErrorSink;

impl ErrorSink for NoopErrorSink {
    fn report(&self, _report: FailureReport) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(key: &str) -> FailureReport {
        FailureReport {
            container: "inbox".into(),
            object_key: key.into(),
            kind: Some(RecordKind::Account),
            error: "boom".into(),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn channel_sink_delivers_and_drops_when_full() {
        let (sink, mut rx) = ChannelErrorSink::new(1);
        sink.report(report("a"));
        sink.report(report("b"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.object_key, "a");
        assert!(rx.try_recv().is_err(), "second report should be dropped");
    }

    #[tokio::test]
    async fn channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelErrorSink::new(4);
        drop(rx);
        sink.report(report("a"));
    }
}
