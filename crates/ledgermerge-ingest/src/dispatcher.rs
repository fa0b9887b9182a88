//! Notification dispatcher.
//!
//! Turns an upload notification into reconciled records:
//!
//! ```text
//! Notification → resolve kinds → fetch → decode → Reconciler::reconcile_batch
//!                      ↓ (any failure)
//!                  ErrorSink
//! ```
//!
//! Every object's kind is resolved before anything is fetched, so a
//! notification naming an unknown batch type is rejected without side effects.
//! Objects are then processed one after another; the first failure stops the
//! notification.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tracing::Instrument;

use ledgermerge_core::observability::ingest_span;
use ledgermerge_core::record::RecordKind;
use ledgermerge_core::store::JoinedStore;
use ledgermerge_engine::Reconciler;

use crate::blob::BlobStore;
use crate::config::IngestConfig;
use crate::decode::decode_batch;
use crate::error::{IngestError, Result};
use crate::error_sink::{ErrorSink, FailureReport, TracingErrorSink};
use crate::notification::{DEFAULT_KIND_SEPARATOR, Notification, ObjectRef, kind_for_key};

/// Result of ingesting one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectOutcome {
    /// Container (bucket) of the object.
    pub container: String,
    /// Object key.
    pub object_key: String,
    /// Batch kind.
    pub kind: RecordKind,
    /// Records reconciled.
    pub records: usize,
    /// Of those, redelivered records that were already applied.
    pub duplicates: usize,
}

/// Result of handling one notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Per-object outcomes, in notification order.
    pub objects: Vec<ObjectOutcome>,
}

impl DispatchSummary {
    /// Total records reconciled across all objects.
    #[must_use]
    pub fn records(&self) -> usize {
        self.objects.iter().map(|o| o.records).sum()
    }
}

/// Routes uploaded batch files to the reconciler.
pub struct Dispatcher<S: JoinedStore + ?Sized, B: BlobStore + ?Sized> {
    reconciler: Reconciler<S>,
    blobs: Arc<B>,
    sink: Arc<dyn ErrorSink>,
    kind_separator: char,
}

impl<S: JoinedStore + ?Sized, B: BlobStore + ?Sized> Dispatcher<S, B> {
    /// Creates a dispatcher that logs failures.
    #[must_use]
    pub fn new(reconciler: Reconciler<S>, blobs: Arc<B>) -> Self {
        Self {
            reconciler,
            blobs,
            sink: Arc::new(TracingErrorSink),
            kind_separator: DEFAULT_KIND_SEPARATOR,
        }
    }

    /// Creates a dispatcher from configuration.
    #[must_use]
    pub fn from_config(store: Arc<S>, blobs: Arc<B>, config: &IngestConfig) -> Self {
        let reconciler = Reconciler::with_config(store, config.reconciler_config());
        Self::new(reconciler, blobs).with_kind_separator(config.kind_separator)
    }

    /// Replaces the error sink.
    #[must_use]
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the kind prefix separator.
    #[must_use]
    pub fn with_kind_separator(mut self, separator: char) -> Self {
        self.kind_separator = separator;
        self
    }

    /// Returns the reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    /// Handles one notification.
    ///
    /// # Errors
    ///
    /// Returns the first failure. It is reported to the error sink first.
    pub async fn handle(&self, notification: &Notification) -> Result<DispatchSummary> {
        let mut planned = Vec::with_capacity(notification.objects().len());
        for object in notification.objects() {
            match kind_for_key(&object.key, self.kind_separator) {
                Ok(kind) => planned.push((object, kind)),
                Err(e) => {
                    let err = IngestError::from(e);
                    self.report(object, None, &err);
                    return Err(err);
                }
            }
        }

        let mut summary = DispatchSummary::default();
        for (object, kind) in planned {
            let span = ingest_span(&object.container, &object.key);
            match self.ingest_object(object, kind).instrument(span).await {
                Ok(outcome) => summary.objects.push(outcome),
                Err(err) => {
                    self.report(object, Some(kind), &err);
                    return Err(err);
                }
            }
        }

        tracing::info!(
            objects = summary.objects.len(),
            records = summary.records(),
            "notification handled"
        );
        Ok(summary)
    }

    /// Decodes and reconciles a batch that is already in memory.
    ///
    /// # Errors
    ///
    /// Returns a decode error or the first reconciliation failure.
    pub async fn ingest_bytes(
        &self,
        container: &str,
        object_key: &str,
        kind: RecordKind,
        data: &Bytes,
    ) -> Result<ObjectOutcome> {
        let batch = decode_batch(kind, data)?;
        let records = batch.into_records();
        tracing::debug!(kind = kind.as_str(), rows = records.len(), "reconciling batch");

        let report = self
            .reconciler
            .reconcile_batch(&records)
            .await
            .map_err(|e| IngestError::Reconcile {
                object_key: object_key.to_string(),
                row: e.index + 1,
                source: e.source,
            })?;

        Ok(ObjectOutcome {
            container: container.to_string(),
            object_key: object_key.to_string(),
            kind,
            records: report.len(),
            duplicates: report.duplicates(),
        })
    }

    async fn ingest_object(&self, object: &ObjectRef, kind: RecordKind) -> Result<ObjectOutcome> {
        let data = self.blobs.fetch(&object.container, &object.key).await?;
        self.ingest_bytes(&object.container, &object.key, kind, &data)
            .await
    }

    fn report(&self, object: &ObjectRef, kind: Option<RecordKind>, err: &IngestError) {
        self.sink.report(FailureReport {
            container: object.container.clone(),
            object_key: object.key.clone(),
            kind,
            error: err.to_string(),
            occurred_at: Utc::now(),
        });
    }
}
