//! End-to-end walk through a typical out-of-order delivery.
//!
//! Account 42 arrives first, then a grouping linking it to subject S-1, then
//! the subject itself, then an entry on the account.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use rust_decimal_macros::dec;

use ledgermerge_core::joined::SubjectState;
use ledgermerge_core::store::{Field, JoinedStore, MemoryStore, RecordFilter};
use ledgermerge_core::{DirectoryStore, MergeKey};
use ledgermerge_engine::{Change, Reconciler};
use ledgermerge_test_utils::{account, assert_balance, assert_copy_matches, entry, grouping, subject};

async fn walk_through<S: JoinedStore>(reconciler: &Reconciler<S>) {
    let subject_key = MergeKey::subject_reference("S-1");
    let account_key = MergeKey::account(42);

    // 1. Account alone: filed under its number, nothing else exists.
    let outcome = reconciler
        .reconcile(&account(42, dec!(100.00)).into())
        .await
        .unwrap();
    assert_eq!(outcome.writes.len(), 1);
    assert!(reconciler.lookup(&subject_key).await.unwrap().is_none());

    // 2. Grouping: cross-reference at the account key, placeholder subject
    //    holding a copy of the account at the subject key.
    let outcome = reconciler
        .reconcile(&grouping("P-1", "S-1", 42).into())
        .await
        .unwrap();
    assert_eq!(outcome.merge_key, subject_key);
    assert_eq!(
        outcome.writes.iter().map(|w| w.change).collect::<Vec<_>>(),
        [Change::Updated, Change::Created]
    );

    let joined = reconciler.lookup(&subject_key).await.unwrap().unwrap();
    assert!(matches!(
        joined.subject,
        Some(SubjectState::Placeholder { ref reference }) if reference == "S-1"
    ));
    assert_balance(joined.complete_account(42).unwrap(), Some(dec!(100.00)));

    let by_cross_reference = reconciler
        .lookup_with(
            &account_key,
            &RecordFilter::Equals(Field::CrossReference, "S-1".into()),
        )
        .await
        .unwrap();
    assert_eq!(by_cross_reference.len(), 1);

    // 3. Subject: placeholder replaced, grouping and account kept.
    reconciler.reconcile(&subject("S-1").into()).await.unwrap();
    let joined = reconciler.lookup(&subject_key).await.unwrap().unwrap();
    assert_eq!(
        joined.subject.as_ref().and_then(SubjectState::as_complete),
        Some(&subject("S-1"))
    );
    assert!(joined.grouping("P-1").is_some());
    assert!(joined.complete_account(42).is_some());

    // 4. Entry: appended at the account key and propagated.
    let outcome = reconciler
        .reconcile(&entry("T-1", 42, dec!(-25.50)).into())
        .await
        .unwrap();
    assert_eq!(outcome.writes.len(), 2);

    let joined = reconciler.lookup(&subject_key).await.unwrap().unwrap();
    let by_account = reconciler.lookup(&account_key).await.unwrap().unwrap();
    assert_balance(joined.complete_account(42).unwrap(), Some(dec!(74.50)));
    assert_copy_matches(&joined, &by_account, 42);

    let no_placeholder = RecordFilter::All(vec![
        RecordFilter::Present(Field::Subject),
        RecordFilter::Equals(Field::Accounts, "42".into()),
    ]);
    assert_eq!(
        reconciler
            .lookup_with(&subject_key, &no_placeholder)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn example_scenario_in_memory() {
    let reconciler = Reconciler::new(Arc::new(MemoryStore::new()));
    walk_through(&reconciler).await;
}

#[tokio::test]
async fn example_scenario_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DirectoryStore::open(dir.path()).await.unwrap());
    let reconciler = Reconciler::new(store);
    walk_through(&reconciler).await;

    let reopened = Reconciler::new(Arc::new(DirectoryStore::open(dir.path()).await.unwrap()));
    let joined = reopened
        .lookup(&MergeKey::subject_reference("S-1"))
        .await
        .unwrap()
        .unwrap();
    assert_balance(joined.complete_account(42).unwrap(), Some(dec!(74.50)));
}

#[tokio::test]
async fn entries_before_account_are_absorbed() {
    let reconciler = Reconciler::new(Arc::new(MemoryStore::new()));
    let account_key = MergeKey::account(42);

    reconciler
        .reconcile(&entry("T-1", 42, dec!(-5)).into())
        .await
        .unwrap();
    reconciler
        .reconcile(&entry("T-2", 42, dec!(2)).into())
        .await
        .unwrap();
    let pending = reconciler
        .lookup_with(&account_key, &RecordFilter::Present(Field::PendingEntries))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].account(42).unwrap().entries().len(), 2);

    reconciler
        .reconcile(&account(42, dec!(10)).into())
        .await
        .unwrap();
    let joined = reconciler.lookup(&account_key).await.unwrap().unwrap();
    assert!(!joined.has_pending_entries());
    assert_balance(joined.complete_account(42).unwrap(), Some(dec!(7)));
}
