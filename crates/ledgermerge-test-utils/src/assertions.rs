//! Custom assertion helpers for integration tests.

use std::collections::HashSet;

use rust_decimal::Decimal;

use ledgermerge_core::joined::{AccountState, AccountView, JoinedRecord};

/// Returns a copy of `record` with every collection sorted by identity.
///
/// Entry order and the account commit sequence depend on arrival order;
/// everything else about a joined record does not. Compare normalized
/// records when checking convergence.
pub fn normalized(record: &JoinedRecord) -> JoinedRecord {
    let mut record = record.clone();
    record.groupings.sort_by(|a, b| a.reference.cmp(&b.reference));
    record.accounts.sort_by_key(AccountState::account_number);
    for account in &mut record.accounts {
        match account {
            AccountState::Complete(view) => {
                view.entries.sort_by(|a, b| a.reference.cmp(&b.reference));
                view.seq = 0;
            }
            AccountState::Pending { entries, .. } => {
                entries.sort_by(|a, b| a.reference.cmp(&b.reference));
            }
        }
    }
    record
}

/// Asserts that two sets of joined records are equal up to entry order.
///
/// # Panics
///
/// Panics on the first key whose normalized records differ.
pub fn assert_converged(expected: &[JoinedRecord], actual: &[JoinedRecord]) {
    assert_eq!(
        expected.len(),
        actual.len(),
        "Expected {} joined records, found {}",
        expected.len(),
        actual.len()
    );
    for (e, a) in expected.iter().zip(actual) {
        assert_eq!(
            normalized(e),
            normalized(a),
            "Joined record at {} diverged",
            e.merge_key
        );
    }
}

/// Asserts that no grouping, account or entry appears twice in a record.
///
/// # Panics
///
/// Panics if a collection contains two items with the same identity.
pub fn assert_no_duplicate_entries(record: &JoinedRecord) {
    let mut groupings = HashSet::new();
    for g in &record.groupings {
        assert!(
            groupings.insert(g.reference.as_str()),
            "Grouping {} appears twice at {}",
            g.reference,
            record.merge_key
        );
    }

    let mut accounts = HashSet::new();
    for account in &record.accounts {
        assert!(
            accounts.insert(account.account_number()),
            "Account {} appears twice at {}",
            account.account_number(),
            record.merge_key
        );
        let mut entries = HashSet::new();
        for e in account.entries() {
            assert!(
                entries.insert(e.reference.as_str()),
                "Entry {} appears twice on account {} at {}",
                e.reference,
                account.account_number(),
                record.merge_key
            );
        }
    }
}

/// Asserts that a view's balance equals its cash balance plus its entries.
///
/// # Panics
///
/// Panics if the stored balance disagrees with the recomputed one, or with
/// `expected` when given.
pub fn assert_balance(view: &AccountView, expected: Option<Decimal>) {
    let recomputed = view.account.cash_balance + view.entries.iter().map(|e| e.amount).sum::<Decimal>();
    assert_eq!(
        view.balance, recomputed,
        "Balance of account {} is stale",
        view.account.account_number
    );
    if let Some(expected) = expected {
        assert_eq!(
            view.balance, expected,
            "Unexpected balance for account {}",
            view.account.account_number
        );
    }
}

/// Asserts that the copy of an account held at a subject key matches the
/// account key's own view.
///
/// # Panics
///
/// Panics if either side lacks a complete account `account_number`, or if
/// the two copies differ in fields or entries.
pub fn assert_copy_matches(subject_record: &JoinedRecord, account_record: &JoinedRecord, account_number: u64) {
    let copy = subject_record
        .complete_account(account_number)
        .unwrap_or_else(|| {
            panic!(
                "No complete copy of account {account_number} at {}",
                subject_record.merge_key
            )
        });
    let authoritative = account_record
        .complete_account(account_number)
        .unwrap_or_else(|| panic!("Account {account_number} is not complete at its own key"));

    let mut copy = copy.clone();
    let mut authoritative = authoritative.clone();
    copy.entries.sort_by(|a, b| a.reference.cmp(&b.reference));
    authoritative
        .entries
        .sort_by(|a, b| a.reference.cmp(&b.reference));
    assert_eq!(
        copy, authoritative,
        "Copy of account {account_number} at {} diverged from the account key",
        subject_record.merge_key
    );
}
