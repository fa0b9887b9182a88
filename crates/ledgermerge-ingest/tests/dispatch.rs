//! Integration tests for notification dispatch.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use rust_decimal_macros::dec;

use ledgermerge_core::MergeKey;
use ledgermerge_core::joined::SubjectState;
use ledgermerge_core::record::RecordKind;
use ledgermerge_core::store::MemoryStore;
use ledgermerge_core::DirectoryStore;
use ledgermerge_engine::{ReconcileError, Reconciler};
use ledgermerge_ingest::{
    ChannelErrorSink, Dispatcher, FetchError, IngestConfig, IngestError, LocalBlobStore,
    MemoryBlobStore, Notification, ObjectRef,
};
use ledgermerge_test_utils::{
    ACCOUNTS_CSV, CLIENTS_CSV, PORTFOLIOS_CSV, TRANSACTIONS_CSV, TracingMemoryStore,
    assert_balance, assert_copy_matches, init_test_logging,
};

const INBOX: &str = "inbox";

fn blobs() -> Arc<MemoryBlobStore> {
    let blobs = MemoryBlobStore::new();
    blobs.insert(INBOX, "clients_1.csv", CLIENTS_CSV);
    blobs.insert(INBOX, "portfolios_1.csv", PORTFOLIOS_CSV);
    blobs.insert(INBOX, "accounts_1.csv", ACCOUNTS_CSV);
    blobs.insert(INBOX, "transactions_1.csv", TRANSACTIONS_CSV);
    Arc::new(blobs)
}

fn notification(keys: &[&str]) -> Notification {
    Notification::new(keys.iter().map(|k| ObjectRef::new(INBOX, *k)).collect()).unwrap()
}

#[tokio::test]
async fn reverse_dependency_order_is_fully_joined() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(Reconciler::new(store.clone()), blobs());

    let summary = dispatcher
        .handle(&notification(&[
            "transactions_1.csv",
            "accounts_1.csv",
            "portfolios_1.csv",
            "clients_1.csv",
        ]))
        .await
        .unwrap();

    assert_eq!(summary.objects.len(), 4);
    assert_eq!(summary.records(), 9);
    assert_eq!(summary.objects[0].kind, RecordKind::LedgerEntry);

    let reconciler = dispatcher.reconciler();
    let s1 = reconciler
        .lookup(&MergeKey::subject_reference("S-1"))
        .await
        .unwrap()
        .unwrap();
    let a42 = reconciler
        .lookup(&MergeKey::account(42))
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(s1.subject, Some(SubjectState::Complete(_))));
    assert_balance(s1.complete_account(42).unwrap(), Some(dec!(84.50)));
    assert_copy_matches(&s1, &a42, 42);
    assert_eq!(a42.cross_reference.as_deref(), Some("S-1"));
}

#[tokio::test]
async fn redelivered_notification_is_all_duplicates() {
    let dispatcher = Dispatcher::new(Reconciler::new(Arc::new(MemoryStore::new())), blobs());
    let n = notification(&["accounts_1.csv", "transactions_1.csv"]);

    dispatcher.handle(&n).await.unwrap();
    let again = dispatcher.handle(&n).await.unwrap();
    for object in &again.objects {
        assert_eq!(object.duplicates, object.records, "{}", object.object_key);
    }
}

#[tokio::test]
async fn unknown_kind_rejects_notification_before_fetching() {
    let blobs = blobs();
    let (sink, mut reports) = ChannelErrorSink::new(8);
    let dispatcher = Dispatcher::new(Reconciler::new(Arc::new(MemoryStore::new())), blobs.clone())
        .with_error_sink(Arc::new(sink));

    let err = dispatcher
        .handle(&notification(&["clients_1.csv", "invoices_1.csv"]))
        .await
        .unwrap_err();

    let IngestError::UnknownKind(unknown) = err else {
        panic!("expected unknown kind, got {err:?}");
    };
    assert_eq!(unknown.prefix, "invoices");
    assert_eq!(blobs.fetch_count(), 0);

    let report = reports.try_recv().unwrap();
    assert_eq!(report.object_key, "invoices_1.csv");
    assert_eq!(report.kind, None);
}

#[tokio::test]
async fn decode_failure_stops_and_is_reported() {
    let blobs = blobs();
    blobs.insert(
        INBOX,
        "accounts_bad.csv",
        "record_id,account_number,cash_balance,currency,taxes_paid\n1,42,oops,EUR,0\n",
    );
    let (sink, mut reports) = ChannelErrorSink::new(8);
    let dispatcher = Dispatcher::new(Reconciler::new(Arc::new(MemoryStore::new())), blobs)
        .with_error_sink(Arc::new(sink));

    let err = dispatcher
        .handle(&notification(&["accounts_bad.csv", "clients_1.csv"]))
        .await
        .unwrap_err();

    let IngestError::Decode(decode) = err else {
        panic!("expected decode error, got {err:?}");
    };
    assert_eq!(decode.row, 1);
    assert_eq!(decode.column.as_deref(), Some("cash_balance"));

    let report = reports.try_recv().unwrap();
    assert_eq!(report.kind, Some(RecordKind::Account));
    assert!(reports.try_recv().is_err(), "second object must not run");
}

#[tokio::test]
async fn missing_object_is_a_fetch_error() {
    let dispatcher = Dispatcher::new(Reconciler::new(Arc::new(MemoryStore::new())), blobs());
    let err = dispatcher
        .handle(&notification(&["clients_missing.csv"]))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Fetch(FetchError::NotFound { .. })));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn store_failure_names_object_and_row() {
    let store = Arc::new(TracingMemoryStore::new());
    store.inject_failure("S-2");
    let dispatcher = Dispatcher::new(Reconciler::new(store.clone()), blobs());

    let err = dispatcher
        .handle(&notification(&["clients_1.csv"]))
        .await
        .unwrap_err();

    let IngestError::Reconcile {
        object_key,
        row,
        source,
    } = err
    else {
        panic!("expected reconcile error");
    };
    assert_eq!(object_key, "clients_1.csv");
    assert_eq!(row, 2);
    assert!(matches!(source, ReconcileError::Store { .. }));
    assert!(store.peek(&MergeKey::subject_reference("S-1")).await.is_some());
}

#[tokio::test]
async fn local_directories_end_to_end() {
    let blob_root = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let inbox = blob_root.path().join(INBOX);
    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::write(inbox.join("accounts_2024 Q1.csv"), ACCOUNTS_CSV).unwrap();
    std::fs::write(inbox.join("portfolios_2024 Q1.csv"), PORTFOLIOS_CSV).unwrap();

    let payload = br#"{"Records": [
        {"s3": {"bucket": {"name": "inbox"}, "object": {"key": "accounts_2024+Q1.csv"}}},
        {"s3": {"bucket": {"name": "inbox"}, "object": {"key": "portfolios_2024%20Q1.csv"}}}
    ]}"#;
    let notification = Notification::parse(payload).unwrap();

    let store = Arc::new(DirectoryStore::open(store_dir.path()).await.unwrap());
    let blobs = Arc::new(LocalBlobStore::new(blob_root.path()));
    let dispatcher = Dispatcher::from_config(store, blobs, &IngestConfig::default());

    let summary = dispatcher.handle(&notification).await.unwrap();
    assert_eq!(summary.records(), 4);

    let reopened = Reconciler::new(Arc::new(DirectoryStore::open(store_dir.path()).await.unwrap()));
    let s2 = reopened
        .lookup(&MergeKey::subject_reference("S-2"))
        .await
        .unwrap()
        .unwrap();
    assert!(s2.subject.as_ref().unwrap().is_placeholder());
    assert_balance(s2.complete_account(43).unwrap(), Some(dec!(50.00)));
}
