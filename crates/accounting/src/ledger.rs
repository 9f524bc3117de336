//! Read side of the journal: account ledgers, trial balance, entry search.
//!
//! Everything here is a pure function over committed entries. Nothing is
//! cached or mutated, so a projection can always be recomputed from the log.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopkeep_core::Money;

use crate::account::AccountName;
use crate::journal::{EntryType, JournalEntry};

/// A committed journal entry with its store metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedEntry {
    pub entry: JournalEntry,
    /// Position in the journal stream (1-based).
    pub entry_number: u64,
    /// Commit order across all streams; breaks ties between equal dates.
    pub global_position: u64,
    pub recorded_at: DateTime<Utc>,
}

impl PostedEntry {
    /// Human entry number, e.g. `JE-000042`.
    pub fn number_label(&self) -> String {
        format!("JE-{:06}", self.entry_number)
    }

    fn chronological_key(&self) -> (DateTime<Utc>, u64) {
        (self.entry.date, self.global_position)
    }
}

/// Inclusive date window. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Period {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn until(to: DateTime<Utc>) -> Self {
        Self { from: None, to: Some(to) }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }

    fn is_before(&self, at: DateTime<Utc>) -> bool {
        self.from.is_some_and(|from| at < from)
    }
}

/// Display order for ledger lines. Running balances are always folded in
/// chronological order regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOrder {
    #[default]
    Chronological,
    NewestFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub entry_id: Uuid,
    pub entry_number: u64,
    pub date: DateTime<Utc>,
    pub entry_type: EntryType,
    pub description: String,
    pub debit: Money,
    pub credit: Money,
    pub running_balance: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLedger {
    pub account: AccountName,
    /// Balance carried in from entries dated before the period.
    pub opening_balance: Money,
    pub lines: Vec<LedgerLine>,
    pub total_debit: Money,
    pub total_credit: Money,
    pub final_balance: Money,
}

/// Ledger of one account over `period`.
///
/// Entries are ordered by `(date, commit order)` and folded debit-positive.
pub fn account_ledger(
    entries: &[PostedEntry],
    account: &AccountName,
    period: Period,
    order: LedgerOrder,
) -> AccountLedger {
    let mut relevant: Vec<&PostedEntry> = entries
        .iter()
        .filter(|p| p.entry.touches(account))
        .collect();
    relevant.sort_by_key(|p| p.chronological_key());

    let mut opening_balance = Money::ZERO;
    let mut running = Money::ZERO;
    let mut total_debit = Money::ZERO;
    let mut total_credit = Money::ZERO;
    let mut lines = Vec::new();

    for posted in relevant {
        let entry = &posted.entry;
        let effect = entry.effect_on(account);

        if period.is_before(entry.date) {
            opening_balance += effect;
            running += effect;
            continue;
        }
        if !period.contains(entry.date) {
            continue;
        }

        running += effect;
        let (debit, credit) = if effect.is_negative() {
            (Money::ZERO, -effect)
        } else {
            (effect, Money::ZERO)
        };
        total_debit += debit;
        total_credit += credit;

        lines.push(LedgerLine {
            entry_id: entry.id,
            entry_number: posted.entry_number,
            date: entry.date,
            entry_type: entry.entry_type,
            description: entry.description.clone(),
            debit,
            credit,
            running_balance: running,
        });
    }

    if order == LedgerOrder::NewestFirst {
        lines.reverse();
    }

    AccountLedger {
        account: account.clone(),
        opening_balance,
        lines,
        total_debit,
        total_credit,
        final_balance: opening_balance + total_debit - total_credit,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalanceRow {
    pub account: AccountName,
    pub debit: Money,
    pub credit: Money,
    /// `debit - credit`.
    pub balance: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of: Option<DateTime<Utc>>,
    /// Sorted by account name.
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Money,
    pub total_credit: Money,
    pub difference: Money,
    pub is_balanced: bool,
}

/// Trial balance over entries dated on or before `as_of` (all when `None`).
pub fn trial_balance(entries: &[PostedEntry], as_of: Option<DateTime<Utc>>) -> TrialBalance {
    let mut sides: BTreeMap<&AccountName, (Money, Money)> = BTreeMap::new();

    for posted in entries {
        let entry = &posted.entry;
        if as_of.is_some_and(|cutoff| entry.date > cutoff) {
            continue;
        }
        sides.entry(&entry.debit_account).or_default().0 += entry.amount;
        sides.entry(&entry.credit_account).or_default().1 += entry.amount;
    }

    let rows: Vec<TrialBalanceRow> = sides
        .into_iter()
        .map(|(account, (debit, credit))| TrialBalanceRow {
            account: account.clone(),
            debit,
            credit,
            balance: debit - credit,
        })
        .collect();

    let total_debit: Money = rows.iter().map(|r| r.debit).sum();
    let total_credit: Money = rows.iter().map(|r| r.credit).sum();
    let difference = total_debit - total_credit;

    TrialBalance {
        as_of,
        rows,
        total_debit,
        total_credit,
        difference,
        is_balanced: difference.is_zero(),
    }
}

/// Search criteria for journal listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    pub period: Period,
    pub entry_type: Option<EntryType>,
    /// Matches either side of the entry.
    pub account: Option<AccountName>,
    pub limit: Option<usize>,
}

/// Entries matching `filter`, newest first.
pub fn filter_entries<'a>(entries: &'a [PostedEntry], filter: &EntryFilter) -> Vec<&'a PostedEntry> {
    let mut matching: Vec<&PostedEntry> = entries
        .iter()
        .filter(|p| filter.period.contains(p.entry.date))
        .filter(|p| filter.entry_type.is_none_or(|t| p.entry.entry_type == t))
        .filter(|p| filter.account.as_ref().is_none_or(|a| p.entry.touches(a)))
        .collect();

    matching.sort_by_key(|p| std::cmp::Reverse(p.chronological_key()));
    if let Some(limit) = filter.limit {
        matching.truncate(limit);
    }
    matching
}

/// Every account name seen in the journal, sorted.
pub fn chart_of_accounts(entries: &[PostedEntry]) -> Vec<AccountName> {
    entries
        .iter()
        .flat_map(|p| [&p.entry.debit_account, &p.entry.credit_account])
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::journal::EntryType;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use shopkeep_core::ActorId;

    pub(crate) fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, n, 10, 0, 0).unwrap()
    }

    pub(crate) fn posted(
        position: u64,
        date: DateTime<Utc>,
        debit: &str,
        credit: &str,
        minor: i64,
    ) -> PostedEntry {
        PostedEntry {
            entry: JournalEntry {
                id: Uuid::now_v7(),
                date,
                entry_type: EntryType::Adjustment,
                description: format!("{debit} / {credit}"),
                debit_account: AccountName::new(debit).unwrap(),
                credit_account: AccountName::new(credit).unwrap(),
                amount: Money::from_minor(minor),
                reference: None,
                created_by: ActorId::new(),
                is_system_generated: false,
                notes: None,
                reverses: None,
            },
            entry_number: position,
            global_position: position,
            recorded_at: date,
        }
    }

    fn cash() -> AccountName {
        AccountName::new("Cash").unwrap()
    }

    #[test]
    fn cash_sale_scenario() {
        let entries = vec![posted(1, day(1), "Cash", "Sales Revenue", 50_000)];
        let ledger = account_ledger(&entries, &cash(), Period::all(), LedgerOrder::Chronological);
        assert_eq!(ledger.final_balance, Money::from_major(500));

        let tb = trial_balance(&entries, None);
        assert!(tb.is_balanced);
        assert_eq!(tb.total_debit, Money::from_major(500));
        assert_eq!(tb.rows.len(), 2);
        assert_eq!(tb.rows[0].account.as_str(), "Cash");
        assert_eq!(tb.rows[1].balance, Money::from_major(-500));
    }

    #[test]
    fn running_balance_follows_date_then_commit_order() {
        let entries = vec![
            posted(1, day(3), "Rent Expense", "Cash", 2_000),
            posted(2, day(1), "Cash", "Sales Revenue", 10_000),
            posted(3, day(3), "Cash", "Other Income", 500),
        ];
        let ledger = account_ledger(&entries, &cash(), Period::all(), LedgerOrder::Chronological);
        let balances: Vec<i64> = ledger.lines.iter().map(|l| l.running_balance.minor()).collect();
        assert_eq!(balances, vec![10_000, 8_000, 8_500]);
        assert_eq!(ledger.final_balance.minor(), 8_500);

        let reversed = account_ledger(&entries, &cash(), Period::all(), LedgerOrder::NewestFirst);
        assert_eq!(reversed.lines[0].running_balance.minor(), 8_500);
        assert_eq!(reversed.final_balance, ledger.final_balance);
    }

    #[test]
    fn period_carries_an_opening_balance() {
        let entries = vec![
            posted(1, day(1), "Cash", "Sales Revenue", 10_000),
            posted(2, day(5), "Cash", "Sales Revenue", 3_000),
            posted(3, day(9), "Supplies Expense", "Cash", 1_000),
        ];
        let ledger = account_ledger(
            &entries,
            &cash(),
            Period::between(day(2), day(6)),
            LedgerOrder::Chronological,
        );
        assert_eq!(ledger.opening_balance.minor(), 10_000);
        assert_eq!(ledger.lines.len(), 1);
        assert_eq!(ledger.lines[0].running_balance.minor(), 13_000);
        assert_eq!(ledger.final_balance.minor(), 13_000);
    }

    #[test]
    fn trial_balance_respects_as_of() {
        let entries = vec![
            posted(1, day(1), "Cash", "Sales Revenue", 10_000),
            posted(2, day(10), "Inventory", "Cash", 4_000),
        ];
        let tb = trial_balance(&entries, Some(day(5)));
        assert_eq!(tb.total_debit.minor(), 10_000);
        assert!(tb.rows.iter().all(|r| r.account.as_str() != "Inventory"));
        assert_eq!(tb.difference, Money::ZERO);
    }

    #[test]
    fn filter_returns_newest_first_with_limit() {
        let entries = vec![
            posted(1, day(1), "Cash", "Sales Revenue", 100),
            posted(2, day(2), "Bank", "Sales Revenue", 200),
            posted(3, day(3), "Cash", "Other Income", 300),
        ];
        let filter = EntryFilter {
            account: Some(cash()),
            ..EntryFilter::default()
        };
        let found = filter_entries(&entries, &filter);
        assert_eq!(found.iter().map(|p| p.entry_number).collect::<Vec<_>>(), vec![3, 1]);

        let limited = filter_entries(
            &entries,
            &EntryFilter {
                limit: Some(1),
                ..EntryFilter::default()
            },
        );
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].entry_number, 3);
    }

    #[test]
    fn chart_is_distinct_and_sorted() {
        let entries = vec![
            posted(1, day(1), "Cash", "Sales Revenue", 100),
            posted(2, day(1) + Duration::hours(1), "Bank", "Cash", 50),
        ];
        let names: Vec<String> = chart_of_accounts(&entries)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["Bank", "Cash", "Sales Revenue"]);
    }

    #[test]
    fn entry_numbers_are_zero_padded() {
        let p = posted(42, day(1), "Cash", "Bank", 1);
        assert_eq!(p.number_label(), "JE-000042");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn trial_balance_is_always_balanced(
            raw in prop::collection::vec((0usize..5, 1usize..5, 1u32..28, 1i64..10_000_000i64), 0..40)
        ) {
            const ACCOUNTS: [&str; 5] = ["Cash", "Bank", "Inventory", "Sales Revenue", "Rent Expense"];
            let entries: Vec<PostedEntry> = raw
                .into_iter()
                .enumerate()
                .map(|(i, (d, offset, dd, minor))| {
                    let c = (d + offset) % ACCOUNTS.len();
                    posted(i as u64 + 1, day(dd), ACCOUNTS[d], ACCOUNTS[c], minor)
                })
                .collect();

            let tb = trial_balance(&entries, None);
            prop_assert!(tb.is_balanced);
            prop_assert_eq!(tb.total_debit, tb.total_credit);

            let net: Money = tb.rows.iter().map(|r| r.balance).sum();
            prop_assert_eq!(net, Money::ZERO);

            for row in &tb.rows {
                let ledger = account_ledger(&entries, &row.account, Period::all(), LedgerOrder::Chronological);
                prop_assert_eq!(ledger.final_balance, row.balance);
            }
        }
    }
}
