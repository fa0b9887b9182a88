//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create records and CSV batches with sensible
//! defaults.

use rust_decimal::Decimal;

use ledgermerge_core::record::{Account, Grouping, LedgerEntry, Subject};

/// Creates a subject with the given reference.
pub fn subject(reference: &str) -> Subject {
    Subject {
        record_id: 1,
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        reference: reference.to_string(),
        tax_free_allowance: Decimal::new(80_000, 2),
    }
}

/// Creates a grouping owned by `subject_reference` that points at `account_number`.
pub fn grouping(reference: &str, subject_reference: &str, account_number: u64) -> Grouping {
    Grouping {
        record_id: 1,
        account_number,
        reference: reference.to_string(),
        subject_reference: subject_reference.to_string(),
        agent_code: "AG-7".to_string(),
    }
}

/// Creates an account with the given cash balance.
pub fn account(account_number: u64, cash_balance: Decimal) -> Account {
    Account {
        record_id: 1,
        account_number,
        cash_balance,
        currency: "EUR".to_string(),
        taxes_paid: Decimal::ZERO,
    }
}

/// Creates a ledger entry against `account_number`.
pub fn entry(reference: &str, account_number: u64, amount: Decimal) -> LedgerEntry {
    LedgerEntry {
        record_id: 1,
        account_number,
        reference: reference.to_string(),
        amount,
        keyword: "transfer".to_string(),
    }
}

/// Subject file with two subjects.
pub const CLIENTS_CSV: &str = "\
record_id,first_name,last_name,client_reference,tax_free_allowance
1,Ada,Lovelace,S-1,801.00
2,Alan,Turing,S-2,500.00
";

/// Grouping file linking both subjects to one account each.
pub const PORTFOLIOS_CSV: &str = "\
record_id,account_number,portfolio_reference,client_reference,agent_code
1,42,P-1,S-1,AG-7
2,43,P-2,S-2,AG-7
";

/// Account file for accounts 42 and 43.
pub const ACCOUNTS_CSV: &str = "\
record_id,account_number,cash_balance,currency,taxes_paid
1,42,100.00,EUR,0.00
2,43,50.00,EUR,1.50
";

/// Ledger entry file with two entries on 42 and one on 43.
pub const TRANSACTIONS_CSV: &str = "\
record_id,account_number,transaction_reference,amount,keyword
1,42,T-1,-25.50,card
2,42,T-2,10.00,deposit
3,43,T-3,5.00,interest
";
