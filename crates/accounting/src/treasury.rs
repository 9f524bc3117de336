//! Cash position views. Thin wrappers over the account ledger so the
//! treasury balance can never disagree with the ledger.

use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use shopkeep_core::Money;

use crate::account::AccountName;
use crate::ledger::{account_ledger, LedgerOrder, Period, PostedEntry};

/// Current balance of the cash account (the ledger's final balance).
pub fn cash_balance(entries: &[PostedEntry], cash_account: &AccountName) -> Money {
    account_ledger(entries, cash_account, Period::all(), LedgerOrder::Chronological).final_balance
}

/// Daily cashbox summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashboxDay {
    pub day: NaiveDate,
    pub opening: Money,
    pub inflow: Money,
    pub outflow: Money,
    pub closing: Money,
}

/// Cash movement for one UTC calendar day.
pub fn cashbox_day(entries: &[PostedEntry], cash_account: &AccountName, day: NaiveDate) -> CashboxDay {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    let end = day
        .checked_add_days(Days::new(1))
        .map(|next| next.and_time(NaiveTime::MIN).and_utc() - chrono::Duration::nanoseconds(1))
        .unwrap_or(start);

    let ledger = account_ledger(
        entries,
        cash_account,
        Period::between(start, end),
        LedgerOrder::Chronological,
    );

    CashboxDay {
        day,
        opening: ledger.opening_balance,
        inflow: ledger.total_debit,
        outflow: ledger.total_credit,
        closing: ledger.final_balance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{day, posted};

    #[test]
    fn balance_equals_ledger_final_balance() {
        let cash = AccountName::new("Cash").unwrap();
        let entries = vec![
            posted(1, day(1), "Cash", "Sales Revenue", 50_000),
            posted(2, day(2), "Rent Expense", "Cash", 20_000),
        ];
        assert_eq!(cash_balance(&entries, &cash), Money::from_major(300));
    }

    #[test]
    fn cashbox_splits_inflow_and_outflow_for_the_day() {
        let cash = AccountName::new("Cash").unwrap();
        let entries = vec![
            posted(1, day(1), "Cash", "Sales Revenue", 10_000),
            posted(2, day(2), "Cash", "Sales Revenue", 4_000),
            posted(3, day(2), "Utilities Expense", "Cash", 1_500),
            posted(4, day(3), "Cash", "Other Income", 999),
        ];
        let summary = cashbox_day(&entries, &cash, day(2).date_naive());
        assert_eq!(summary.opening.minor(), 10_000);
        assert_eq!(summary.inflow.minor(), 4_000);
        assert_eq!(summary.outflow.minor(), 1_500);
        assert_eq!(summary.closing.minor(), 12_500);
    }
}
