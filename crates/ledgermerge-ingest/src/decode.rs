//! Record decoder for CSV batch files.
//!
//! Batches are comma-separated with a header row. Columns are matched by
//! header name, so column order does not matter and extra columns are
//! ignored. Fields are trimmed.

use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use ledgermerge_core::record::{Account, Grouping, LedgerEntry, RecordKind, Subject};
use ledgermerge_engine::IncomingRecord;

use crate::error::DecodeError;

/// A decoded batch, typed by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBatch {
    /// Subject rows.
    Subjects(Vec<Subject>),
    /// Grouping rows.
    Groupings(Vec<Grouping>),
    /// Account rows.
    Accounts(Vec<Account>),
    /// Ledger entry rows.
    LedgerEntries(Vec<LedgerEntry>),
}

impl DecodedBatch {
    /// The kind of every record in the batch.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Subjects(_) => RecordKind::Subject,
            Self::Groupings(_) => RecordKind::Grouping,
            Self::Accounts(_) => RecordKind::Account,
            Self::LedgerEntries(_) => RecordKind::LedgerEntry,
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Subjects(v) => v.len(),
            Self::Groupings(v) => v.len(),
            Self::Accounts(v) => v.len(),
            Self::LedgerEntries(v) => v.len(),
        }
    }

    /// Returns true if the batch has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts the batch into engine input, preserving row order.
    #[must_use]
    pub fn into_records(self) -> Vec<IncomingRecord> {
        match self {
            Self::Subjects(v) => v.into_iter().map(IncomingRecord::from).collect(),
            Self::Groupings(v) => v.into_iter().map(IncomingRecord::from).collect(),
            Self::Accounts(v) => v.into_iter().map(IncomingRecord::from).collect(),
            Self::LedgerEntries(v) => v.into_iter().map(IncomingRecord::from).collect(),
        }
    }
}

/// Decodes a batch file of the given kind.
///
/// # Errors
///
/// Returns a [`DecodeError`] for a missing header column (row 0), a row with
/// the wrong number of columns, or a value that does not parse.
pub fn decode_batch(kind: RecordKind, bytes: &[u8]) -> Result<DecodedBatch, DecodeError> {
    Ok(match kind {
        RecordKind::Subject => DecodedBatch::Subjects(decode_rows(kind, bytes)?),
        RecordKind::Grouping => DecodedBatch::Groupings(decode_rows(kind, bytes)?),
        RecordKind::Account => DecodedBatch::Accounts(decode_rows(kind, bytes)?),
        RecordKind::LedgerEntry => DecodedBatch::LedgerEntries(decode_rows(kind, bytes)?),
    })
}

fn decode_rows<T: DeserializeOwned>(kind: RecordKind, bytes: &[u8]) -> Result<Vec<T>, DecodeError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| error(kind, 0, None, e.to_string()))?
        .clone();
    for column in kind.columns() {
        if !headers.iter().any(|h| h == *column) {
            return Err(error(
                kind,
                0,
                Some(*column),
                "missing header column".to_string(),
            ));
        }
    }

    let width = headers.len();
    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let row = idx + 1;
        let record = result.map_err(|e| error(kind, row, None, e.to_string()))?;
        if record.len() != width {
            return Err(error(
                kind,
                row,
                None,
                format!("expected {width} columns, found {}", record.len()),
            ));
        }

        let value = record.deserialize::<T>(Some(&headers)).map_err(|e| {
            let column = failing_column(&e, &headers)
                .or_else(|| unparsable_column(kind, &headers, &record));
            error(kind, row, column, deserialize_message(&e))
        })?;
        rows.push(value);
    }

    tracing::debug!(kind = kind.as_str(), rows = rows.len(), "decoded batch");
    Ok(rows)
}

fn error(kind: RecordKind, row: usize, column: Option<&str>, message: String) -> DecodeError {
    DecodeError {
        kind,
        row,
        column: column.map(str::to_string),
        message,
    }
}

fn failing_column<'h>(err: &csv::Error, headers: &'h StringRecord) -> Option<&'h str> {
    match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => err
            .field()
            .and_then(|idx| usize::try_from(idx).ok())
            .and_then(|idx| headers.get(idx)),
        _ => None,
    }
}

fn deserialize_message(err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => err.kind().to_string(),
        _ => err.to_string(),
    }
}

// Custom field deserializers (decimals) do not report their position, so the
// column is found by re-parsing the numeric fields directly.
fn unparsable_column<'h>(
    kind: RecordKind,
    headers: &'h StringRecord,
    record: &StringRecord,
) -> Option<&'h str> {
    headers.iter().zip(record.iter()).find_map(|(name, value)| {
        let known = kind.columns().iter().any(|c| *c == name);
        let bad = match name {
            "record_id" | "account_number" => value.parse::<u64>().is_err(),
            "tax_free_allowance" | "cash_balance" | "taxes_paid" | "amount" => {
                Decimal::from_str(value).is_err()
            }
            _ => false,
        };
        (known && bad).then_some(name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_by_header_name_in_any_order() {
        let csv = "\
amount , keyword,record_id,transaction_reference,account_number
 -12.50 ,fee,7,T-1,42
";
        let batch = decode_batch(RecordKind::LedgerEntry, csv.as_bytes()).unwrap();
        let DecodedBatch::LedgerEntries(entries) = batch else {
            panic!("wrong kind");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, dec!(-12.50));
        assert_eq!(entries[0].reference, "T-1");
        assert_eq!(entries[0].account_number, 42);
    }

    #[test]
    fn header_only_batch_is_empty() {
        let csv = "record_id,first_name,last_name,client_reference,tax_free_allowance\n";
        let batch = decode_batch(RecordKind::Subject, csv.as_bytes()).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.kind(), RecordKind::Subject);
    }

    #[test]
    fn missing_header_column_is_row_zero() {
        let csv = "record_id,account_number,cash_balance,currency\n1,42,1.00,EUR\n";
        let err = decode_batch(RecordKind::Account, csv.as_bytes()).unwrap_err();
        assert_eq!(err.row, 0);
        assert_eq!(err.column.as_deref(), Some("taxes_paid"));
    }

    #[test]
    fn wrong_column_count_names_row() {
        let csv = "\
record_id,account_number,cash_balance,currency,taxes_paid
1,42,1.00,EUR,0
2,43,1.00,EUR
";
        let err = decode_batch(RecordKind::Account, csv.as_bytes()).unwrap_err();
        assert_eq!(err.row, 2);
        assert!(err.message.contains("expected 5 columns"), "{}", err.message);
    }

    #[test]
    fn bad_integer_names_column() {
        let csv = "\
record_id,account_number,portfolio_reference,client_reference,agent_code
1,forty-two,P-1,S-1,AG
";
        let err = decode_batch(RecordKind::Grouping, csv.as_bytes()).unwrap_err();
        assert_eq!(err.row, 1);
        assert_eq!(err.column.as_deref(), Some("account_number"));
    }

    #[test]
    fn bad_decimal_names_column() {
        let csv = "\
record_id,account_number,cash_balance,currency,taxes_paid
1,42,1.00,EUR,0
2,43,lots,EUR,0
";
        let err = decode_batch(RecordKind::Account, csv.as_bytes()).unwrap_err();
        assert_eq!(err.row, 2);
        assert_eq!(err.column.as_deref(), Some("cash_balance"));
    }
}
