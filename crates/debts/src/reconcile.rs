//! Cached customer/supplier balances versus the debt streams.
//!
//! Any per-debtor balance kept outside the debt streams is a cache. This
//! recomputes the truth and reports where the cache drifted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use shopkeep_core::Money;

use crate::debt::{Debt, DebtorId, DebtorKind};

pub type DebtorKey = (DebtorKind, DebtorId);

/// Outstanding amount per debtor over open debts.
pub fn outstanding_by_debtor<'a>(debts: impl IntoIterator<Item = &'a Debt>) -> BTreeMap<DebtorKey, Money> {
    let mut totals = BTreeMap::new();
    for debt in debts {
        let Some(debtor) = debt.debtor_id() else {
            continue;
        };
        if !debt.status().is_open() {
            continue;
        }
        *totals
            .entry((debt.debtor_kind(), debtor.clone()))
            .or_insert(Money::ZERO) += debt.remaining_amount();
    }
    totals
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDrift {
    pub kind: DebtorKind,
    pub debtor_id: DebtorId,
    pub cached: Money,
    pub actual: Money,
    /// `cached - actual`.
    pub drift: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReconciliation {
    pub checked: usize,
    pub drifts: Vec<BalanceDrift>,
}

impl BalanceReconciliation {
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }
}

/// Compare `cached` balances with the recomputed ones. Debtors missing on
/// either side count as zero there.
pub fn reconcile_balances<'a>(
    debts: impl IntoIterator<Item = &'a Debt>,
    cached: &BTreeMap<DebtorKey, Money>,
) -> BalanceReconciliation {
    let actual = outstanding_by_debtor(debts);
    let keys: BTreeSet<&DebtorKey> = actual.keys().chain(cached.keys()).collect();

    let drifts: Vec<BalanceDrift> = keys
        .iter()
        .filter_map(|key| {
            let actual = actual.get(*key).copied().unwrap_or(Money::ZERO);
            let cached = cached.get(*key).copied().unwrap_or(Money::ZERO);
            (actual != cached).then(|| BalanceDrift {
                kind: key.0,
                debtor_id: key.1.clone(),
                cached,
                actual,
                drift: cached - actual,
            })
        })
        .collect();

    BalanceReconciliation {
        checked: keys.len(),
        drifts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debt::tests::{open_debt, pay, run};
    use chrono::{Duration, Utc};

    fn key(kind: DebtorKind, id: &str) -> DebtorKey {
        (kind, DebtorId::new(id).unwrap())
    }

    #[test]
    fn matching_cache_is_clean() {
        let due = Utc::now() + Duration::days(7);
        let mut a = open_debt(DebtorKind::Customer, "a", "INV-1", 1_000, due);
        run(&mut a, &pay(400)).unwrap();
        let b = open_debt(DebtorKind::Customer, "a", "INV-2", 500, due);

        let cached = BTreeMap::from([(key(DebtorKind::Customer, "a"), Money::from_minor(1_100))]);
        let result = reconcile_balances([&a, &b], &cached);
        assert!(result.is_clean());
        assert_eq!(result.checked, 1);
    }

    #[test]
    fn drift_is_reported_both_ways() {
        let due = Utc::now() + Duration::days(7);
        let debts = vec![open_debt(DebtorKind::Supplier, "s", "PO-1", 2_000, due)];
        let cached = BTreeMap::from([
            (key(DebtorKind::Supplier, "s"), Money::from_minor(2_500)),
            (key(DebtorKind::Customer, "ghost"), Money::from_minor(10)),
        ]);

        let result = reconcile_balances(&debts, &cached);
        assert_eq!(result.drifts.len(), 2);
        let supplier = result
            .drifts
            .iter()
            .find(|d| d.kind == DebtorKind::Supplier)
            .unwrap();
        assert_eq!(supplier.drift, Money::from_minor(500));
        let ghost = result
            .drifts
            .iter()
            .find(|d| d.debtor_id.as_str() == "ghost")
            .unwrap();
        assert_eq!(ghost.actual, Money::ZERO);
    }
}
