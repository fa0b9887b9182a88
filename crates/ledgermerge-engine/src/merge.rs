//! Pure merge rules.
//!
//! Every function here takes the record currently stored at a key (if any),
//! the incoming data, and returns the record to write back. They never
//! perform I/O, so the engine can rerun them on a fresh read after losing a
//! compare-and-swap race.
//!
//! Collections are merged by identity and never shrink:
//! - groupings by `reference`
//! - accounts by `account_number`
//! - entries by `reference`
//!
//! A source record whose fingerprint is already in `applied` is not applied
//! again, so a redelivered row cannot overwrite a later correction.

use ledgermerge_core::joined::{AccountState, AccountView, JoinedRecord, SubjectState};
use ledgermerge_core::record::{Account, Grouping, LedgerEntry, Subject};
use ledgermerge_core::MergeKey;

fn base(existing: Option<JoinedRecord>, key: &MergeKey) -> JoinedRecord {
    existing.unwrap_or_else(|| JoinedRecord::empty(key.clone()))
}

fn ensure_subject(record: &mut JoinedRecord, reference: &str) {
    if record.subject.is_none() {
        record.subject = Some(SubjectState::Placeholder {
            reference: reference.to_string(),
        });
    }
}

// Lowest subject reference among the groupings, so the result does not
// depend on which grouping was filed first.
fn set_cross_reference(record: &mut JoinedRecord) {
    record.cross_reference = record
        .groupings
        .iter()
        .map(|g| g.subject_reference.as_str())
        .min()
        .map(str::to_string);
}

/// Inserts or replaces a grouping by reference.
pub fn upsert_grouping(groupings: &mut Vec<Grouping>, grouping: &Grouping) {
    match groupings.iter_mut().find(|g| g.reference == grouping.reference) {
        Some(slot) => slot.clone_from(grouping),
        None => groupings.push(grouping.clone()),
    }
}

/// Inserts or replaces an entry by reference, keeping arrival order.
///
/// Returns true if the entries changed.
pub fn upsert_entry(entries: &mut Vec<LedgerEntry>, entry: &LedgerEntry) -> bool {
    match entries.iter_mut().find(|e| e.reference == entry.reference) {
        Some(slot) if slot == entry => false,
        Some(slot) => {
            slot.clone_from(entry);
            true
        }
        None => {
            entries.push(entry.clone());
            true
        }
    }
}

/// Subject arrival at the subject key.
///
/// Replaces a placeholder (or an earlier row) and keeps every grouping and
/// account copy already filed under the key.
#[must_use]
pub fn apply_subject(
    existing: Option<JoinedRecord>,
    key: &MergeKey,
    subject: &Subject,
    fingerprint: &str,
) -> JoinedRecord {
    let mut record = base(existing, key);
    if record.was_applied(fingerprint) {
        return record;
    }
    record.subject = Some(SubjectState::Complete(subject.clone()));
    record.applied.insert(fingerprint.to_string());
    record
}

/// Grouping arrival, account side: files the cross-reference under the account key.
#[must_use]
pub fn file_grouping_under_account(
    existing: Option<JoinedRecord>,
    key: &MergeKey,
    grouping: &Grouping,
    fingerprint: &str,
) -> JoinedRecord {
    let mut record = base(existing, key);
    if record.was_applied(fingerprint) {
        return record;
    }
    upsert_grouping(&mut record.groupings, grouping);
    set_cross_reference(&mut record);
    record.applied.insert(fingerprint.to_string());
    record
}

/// Grouping arrival, subject side.
///
/// Synthesizes a placeholder subject when none exists yet and merges in a copy
/// of the account if the account had already arrived.
#[must_use]
pub fn apply_grouping(
    existing: Option<JoinedRecord>,
    key: &MergeKey,
    grouping: &Grouping,
    fingerprint: &str,
    account: Option<&AccountView>,
) -> JoinedRecord {
    let mut record = base(existing, key);
    ensure_subject(&mut record, &grouping.subject_reference);
    if !record.was_applied(fingerprint) {
        upsert_grouping(&mut record.groupings, grouping);
        record.applied.insert(fingerprint.to_string());
    }
    if let Some(view) = account {
        merge_account_copy(&mut record.accounts, view);
    }
    record
}

/// Account arrival at the account key.
///
/// Absorbs any bare entry record filed before the account. A redelivered row
/// with different fields bumps the revision.
#[must_use]
pub fn apply_account(
    existing: Option<JoinedRecord>,
    key: &MergeKey,
    account: &Account,
    fingerprint: &str,
) -> JoinedRecord {
    let mut record = base(existing, key);
    if record.was_applied(fingerprint) {
        return record;
    }

    let number = account.account_number;
    match record.accounts.iter().position(|a| a.account_number() == number) {
        None => record
            .accounts
            .push(AccountState::Complete(AccountView::new(account.clone(), Vec::new()))),
        Some(idx) => {
            let slot = &mut record.accounts[idx];
            match slot {
                AccountState::Pending { entries, .. } => {
                    let entries = std::mem::take(entries);
                    *slot = AccountState::Complete(AccountView::new(account.clone(), entries));
                }
                AccountState::Complete(view) => {
                    if view.account != *account {
                        view.account = account.clone();
                        view.revision += 1;
                        view.seq += 1;
                        view.recompute_balance();
                    }
                }
            }
        }
    }

    set_cross_reference(&mut record);
    record.applied.insert(fingerprint.to_string());
    record
}

/// Ledger entry arrival at the account key.
///
/// Appends to the account's entries, or to a bare entry record when the
/// account has not arrived yet.
#[must_use]
pub fn apply_entry(
    existing: Option<JoinedRecord>,
    key: &MergeKey,
    entry: &LedgerEntry,
    fingerprint: &str,
) -> JoinedRecord {
    let mut record = base(existing, key);
    if record.was_applied(fingerprint) {
        return record;
    }

    let number = entry.account_number;
    match record
        .accounts
        .iter_mut()
        .find(|a| a.account_number() == number)
    {
        None => record.accounts.push(AccountState::Pending {
            account_number: number,
            entries: vec![entry.clone()],
        }),
        Some(AccountState::Pending { entries, .. }) => {
            upsert_entry(entries, entry);
        }
        Some(AccountState::Complete(view)) => {
            if upsert_entry(&mut view.entries, entry) {
                view.seq += 1;
                view.recompute_balance();
            }
        }
    }

    record.applied.insert(fingerprint.to_string());
    record
}

/// Fan-out of an account's current state to a subject key.
#[must_use]
pub fn apply_account_copy(
    existing: Option<JoinedRecord>,
    key: &MergeKey,
    subject_reference: &str,
    account: &AccountView,
) -> JoinedRecord {
    let mut record = base(existing, key);
    ensure_subject(&mut record, subject_reference);
    merge_account_copy(&mut record.accounts, account);
    record
}

/// Merges a copy of an account view into a collection of account slots.
pub fn merge_account_copy(accounts: &mut Vec<AccountState>, incoming: &AccountView) {
    let number = incoming.account.account_number;
    match accounts.iter_mut().find(|a| a.account_number() == number) {
        None => accounts.push(AccountState::Complete(incoming.clone())),
        Some(slot) => {
            let merged = match &*slot {
                AccountState::Complete(current) => merge_views(current, incoming),
                AccountState::Pending { entries, .. } => {
                    let mut view = incoming.clone();
                    for entry in entries {
                        if !view.has_entry(&entry.reference) {
                            view.entries.push(entry.clone());
                        }
                    }
                    view.recompute_balance();
                    view
                }
            };
            *slot = AccountState::Complete(merged);
        }
    }
}

/// Combines two copies of the same account.
///
/// Every change at the account key bumps the view's `seq`, so the copy with
/// the higher sequence is the later commit and is taken whole. Equal
/// sequences denote the same commit and keep the current copy.
#[must_use]
pub fn merge_views(current: &AccountView, incoming: &AccountView) -> AccountView {
    if incoming.seq > current.seq {
        incoming.clone()
    } else {
        current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn account(cash: Decimal) -> Account {
        Account {
            record_id: 1,
            account_number: 42,
            cash_balance: cash,
            currency: "EUR".into(),
            taxes_paid: dec!(0),
        }
    }

    fn entry(reference: &str, amount: Decimal) -> LedgerEntry {
        LedgerEntry {
            record_id: 9,
            account_number: 42,
            reference: reference.into(),
            amount,
            keyword: "misc".into(),
        }
    }

    fn grouping(reference: &str, subject: &str) -> Grouping {
        Grouping {
            record_id: 5,
            account_number: 42,
            reference: reference.into(),
            subject_reference: subject.into(),
            agent_code: "AG".into(),
        }
    }

    #[test]
    fn entry_before_account_becomes_pending_then_absorbed() {
        let key = MergeKey::account(42);
        let pending = apply_entry(None, &key, &entry("T-1", dec!(-10)), "e1");
        assert!(pending.has_pending_entries());
        assert!(pending.complete_account(42).is_none());

        let joined = apply_account(Some(pending), &key, &account(dec!(100)), "a1");
        let view = joined.complete_account(42).expect("complete");
        assert_eq!(view.entries.len(), 1);
        assert_eq!(view.balance, dec!(90));
        assert!(!joined.has_pending_entries());
        assert_eq!(joined.accounts.len(), 1);
    }

    #[test]
    fn same_entry_twice_is_not_duplicated() {
        let key = MergeKey::account(42);
        let rec = apply_account(None, &key, &account(dec!(100)), "a1");
        let rec = apply_entry(Some(rec), &key, &entry("T-1", dec!(5)), "e1");
        let rec = apply_entry(Some(rec), &key, &entry("T-1", dec!(5)), "e1");
        assert_eq!(rec.complete_account(42).unwrap().entries.len(), 1);
        assert_eq!(rec.complete_account(42).unwrap().balance, dec!(105));
    }

    #[test]
    fn corrected_entry_replaces_in_place() {
        let key = MergeKey::account(42);
        let rec = apply_account(None, &key, &account(dec!(0)), "a1");
        let rec = apply_entry(Some(rec), &key, &entry("T-1", dec!(5)), "e1");
        let rec = apply_entry(Some(rec), &key, &entry("T-2", dec!(1)), "e2");
        let rec = apply_entry(Some(rec), &key, &entry("T-1", dec!(7)), "e1-fixed");
        let view = rec.complete_account(42).unwrap();
        let refs: Vec<_> = view.entries.iter().map(|e| e.reference.as_str()).collect();
        assert_eq!(refs, ["T-1", "T-2"]);
        assert_eq!(view.balance, dec!(8));
    }

    #[test]
    fn redelivered_original_does_not_undo_correction() {
        let key = MergeKey::account(42);
        let rec = apply_account(None, &key, &account(dec!(100)), "a1");
        let rec = apply_account(Some(rec), &key, &account(dec!(150)), "a1-fixed");
        assert_eq!(rec.complete_account(42).unwrap().revision, 2);

        let rec = apply_account(Some(rec), &key, &account(dec!(100)), "a1");
        let view = rec.complete_account(42).unwrap();
        assert_eq!(view.account.cash_balance, dec!(150));
        assert_eq!(view.revision, 2);
    }

    #[test]
    fn grouping_without_subject_gets_placeholder() {
        let key = MergeKey::subject_reference("S-1");
        let rec = apply_grouping(None, &key, &grouping("P-1", "S-1"), "g1", None);
        let subject = rec.subject.as_ref().expect("subject slot");
        assert!(subject.is_placeholder());
        assert_eq!(subject.reference(), "S-1");
        assert_eq!(rec.groupings.len(), 1);
    }

    #[test]
    fn subject_replaces_placeholder_and_keeps_groupings() {
        let key = MergeKey::subject_reference("S-1");
        let rec = apply_grouping(None, &key, &grouping("P-1", "S-1"), "g1", None);
        let subject = Subject {
            record_id: 1,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            reference: "S-1".into(),
            tax_free_allowance: dec!(801),
        };
        let rec = apply_subject(Some(rec), &key, &subject, "s1");
        assert_eq!(rec.subject.as_ref().unwrap().as_complete(), Some(&subject));
        assert_eq!(rec.groupings.len(), 1);
    }

    #[test]
    fn cross_reference_is_independent_of_filing_order() {
        let key = MergeKey::account(42);
        let rec = file_grouping_under_account(None, &key, &grouping("P-2", "S-2"), "g2");
        assert_eq!(rec.cross_reference.as_deref(), Some("S-2"));
        let rec = file_grouping_under_account(Some(rec), &key, &grouping("P-1", "S-1"), "g1");
        assert_eq!(rec.cross_reference.as_deref(), Some("S-1"));
        assert_eq!(rec.grouping_subjects(), ["S-2", "S-1"]);
    }

    #[test]
    fn account_key_changes_bump_seq() {
        let key = MergeKey::account(42);
        let rec = apply_account(None, &key, &account(dec!(100)), "a1");
        assert_eq!(rec.complete_account(42).unwrap().seq, 1);

        let rec = apply_entry(Some(rec), &key, &entry("T-1", dec!(5)), "e1");
        assert_eq!(rec.complete_account(42).unwrap().seq, 2);

        // Same content under another fingerprint changes nothing.
        let rec = apply_entry(Some(rec), &key, &entry("T-1", dec!(5)), "e1-again");
        assert_eq!(rec.complete_account(42).unwrap().seq, 2);

        let rec = apply_account(Some(rec), &key, &account(dec!(150)), "a1-fixed");
        let view = rec.complete_account(42).unwrap();
        assert_eq!((view.revision, view.seq), (2, 3));
    }

    #[test]
    fn corrected_entry_copy_is_not_undone_by_a_late_stale_copy() {
        let key = MergeKey::account(42);
        let rec = apply_account(None, &key, &account(dec!(0)), "a1");
        let rec = apply_entry(Some(rec), &key, &entry("T-1", dec!(5)), "e1");
        let stale = rec.complete_account(42).unwrap().clone();
        let rec = apply_entry(Some(rec), &key, &entry("T-1", dec!(7)), "e1-fixed");
        let fresh = rec.complete_account(42).unwrap().clone();
        assert_eq!(stale.entries.len(), fresh.entries.len());

        let subject_key = MergeKey::subject_reference("S-1");
        let copy = apply_account_copy(None, &subject_key, "S-1", &fresh);
        let copy = apply_account_copy(Some(copy), &subject_key, "S-1", &stale);

        let got = copy.complete_account(42).unwrap();
        assert_eq!(got, &fresh);
        assert_eq!(got.balance, dec!(7));
    }

    #[test]
    fn higher_seq_supplies_whole_view() {
        let old = AccountView::new(account(dec!(100)), vec![entry("T-1", dec!(1))]);
        let mut newer = AccountView::new(account(dec!(250)), Vec::new());
        newer.revision = 2;
        newer.seq = 3;

        assert_eq!(merge_views(&old, &newer), newer);
        assert_eq!(merge_views(&newer, &old), newer);
    }

    #[test]
    fn pending_copy_is_completed_by_incoming_view() {
        let mut accounts = vec![AccountState::Pending {
            account_number: 42,
            entries: vec![entry("T-9", dec!(3))],
        }];
        let view = AccountView::new(account(dec!(100)), vec![entry("T-1", dec!(1))]);
        merge_account_copy(&mut accounts, &view);

        let merged = accounts[0].as_complete().unwrap();
        assert_eq!(merged.entries.len(), 2);
        assert_eq!(merged.balance, dec!(104));
    }
}
