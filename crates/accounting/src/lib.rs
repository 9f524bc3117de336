//! Accounting module (double-entry journal, event-sourced).
//!
//! Pure domain logic only: no IO, no persistence concerns.
//!
//! - [`journal`]: the append-only journal aggregate (write side).
//! - [`ledger`]: account ledgers and the trial balance (read side).
//! - [`treasury`]: cash balance and daily cashbox views over the ledger.
//! - [`postings`]: standard entries for sales, purchases, payments, etc.

pub mod account;
pub mod journal;
pub mod ledger;
pub mod postings;
pub mod treasury;

pub use account::{AccountName, ChartOfAccounts, ExpenseCategory};
pub use journal::{
    EntryType, Journal, JournalCommand, JournalEntry, JournalEntryPosted, JournalEvent, JournalId,
    PostEntry, Reference, ReferenceType, ReverseEntry, JOURNAL_AGGREGATE_TYPE,
};
pub use ledger::{
    account_ledger, chart_of_accounts, filter_entries, trial_balance, AccountLedger, EntryFilter,
    LedgerLine, LedgerOrder, Period, PostedEntry, TrialBalance, TrialBalanceRow,
};
pub use postings::{PaymentChannel, PostingContext, RefundChannel, SettlementSide};
pub use treasury::{cash_balance, cashbox_day, CashboxDay};
