//! Aging and exposure reports over open debts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopkeep_core::Money;

use crate::debt::{Debt, DebtorId, DebtorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgingTier {
    /// Not yet due.
    Current,
    Days1To30,
    Days31To60,
    Over60,
}

impl AgingTier {
    pub fn for_days_overdue(days: i64) -> Self {
        match days {
            d if d > 60 => AgingTier::Over60,
            d if d > 30 => AgingTier::Days31To60,
            d if d > 0 => AgingTier::Days1To30,
            _ => AgingTier::Current,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTotal {
    pub amount: Money,
    pub count: usize,
}

impl TierTotal {
    fn add(&mut self, amount: Money) {
        self.amount += amount;
        self.count += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskRating {
    Healthy,
    Warning,
    Critical,
}

impl RiskRating {
    /// Critical above 40 % of the total in the 60+ tier, warning above 20 %.
    pub fn from_share(over_60: Money, total: Money) -> Self {
        if !total.is_positive() {
            return RiskRating::Healthy;
        }
        let over = i128::from(over_60.minor());
        let total = i128::from(total.minor());
        if over * 10 > total * 4 {
            RiskRating::Critical
        } else if over * 5 > total {
            RiskRating::Warning
        } else {
            RiskRating::Healthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtorExposure {
    pub debtor_id: DebtorId,
    pub total: Money,
    pub open_debts: usize,
    /// Largest days-overdue across the debtor's open debts (0 if none overdue).
    pub oldest_days_overdue: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingReport {
    pub kind: DebtorKind,
    pub as_of: DateTime<Utc>,
    pub total: Money,
    pub current: TierTotal,
    pub days_1_30: TierTotal,
    pub days_31_60: TierTotal,
    pub over_60: TierTotal,
    /// Sorted by exposure, largest first.
    pub by_debtor: Vec<DebtorExposure>,
    pub risk: RiskRating,
}

/// Whole days between the due date and `now`; negative when not yet due.
pub fn days_overdue(due_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - due_date).num_days()
}

pub fn aging_report<'a>(
    debts: impl IntoIterator<Item = &'a Debt>,
    kind: DebtorKind,
    now: DateTime<Utc>,
) -> AgingReport {
    let mut current = TierTotal::default();
    let mut days_1_30 = TierTotal::default();
    let mut days_31_60 = TierTotal::default();
    let mut over_60 = TierTotal::default();
    let mut by_debtor: BTreeMap<&DebtorId, DebtorExposure> = BTreeMap::new();

    let open = debts.into_iter().filter(|d| {
        d.is_opened()
            && d.debtor_kind() == kind
            && d.status().is_open()
            && d.remaining_amount().is_positive()
    });

    for debt in open {
        let balance = debt.remaining_amount();
        let days = debt.due_date().map(|due| days_overdue(due, now)).unwrap_or(0);
        match AgingTier::for_days_overdue(days) {
            AgingTier::Current => current.add(balance),
            AgingTier::Days1To30 => days_1_30.add(balance),
            AgingTier::Days31To60 => days_31_60.add(balance),
            AgingTier::Over60 => over_60.add(balance),
        }

        if let Some(debtor) = debt.debtor_id() {
            let exposure = by_debtor.entry(debtor).or_insert_with(|| DebtorExposure {
                debtor_id: debtor.clone(),
                total: Money::ZERO,
                open_debts: 0,
                oldest_days_overdue: 0,
            });
            exposure.total += balance;
            exposure.open_debts += 1;
            exposure.oldest_days_overdue = exposure.oldest_days_overdue.max(days);
        }
    }

    let mut by_debtor: Vec<DebtorExposure> = by_debtor.into_values().collect();
    by_debtor.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.debtor_id.cmp(&b.debtor_id)));

    let total = current.amount + days_1_30.amount + days_31_60.amount + over_60.amount;
    AgingReport {
        kind,
        as_of: now,
        total,
        current,
        days_1_30,
        days_31_60,
        over_60,
        by_debtor,
        risk: RiskRating::from_share(over_60.amount, total),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtOverview {
    pub receivables: AgingReport,
    pub payables: AgingReport,
    /// Receivables minus payables.
    pub net: Money,
    /// Rated on receivables: that is where the store carries credit risk.
    pub risk: RiskRating,
}

pub fn debt_overview(debts: &[Debt], now: DateTime<Utc>) -> DebtOverview {
    let receivables = aging_report(debts, DebtorKind::Customer, now);
    let payables = aging_report(debts, DebtorKind::Supplier, now);
    DebtOverview {
        net: receivables.total - payables.total,
        risk: receivables.risk,
        receivables,
        payables,
    }
}

/// Open debts past their due date, most overdue first.
pub fn overdue_debts(debts: &[Debt], now: DateTime<Utc>) -> Vec<&Debt> {
    let mut overdue: Vec<&Debt> = debts.iter().filter(|d| d.is_overdue(now)).collect();
    overdue.sort_by_key(|d| d.due_date());
    overdue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debt::tests::{open_debt, pay, run};
    use chrono::Duration;

    #[test]
    fn tiers_follow_days_overdue() {
        assert_eq!(AgingTier::for_days_overdue(-3), AgingTier::Current);
        assert_eq!(AgingTier::for_days_overdue(0), AgingTier::Current);
        assert_eq!(AgingTier::for_days_overdue(1), AgingTier::Days1To30);
        assert_eq!(AgingTier::for_days_overdue(30), AgingTier::Days1To30);
        assert_eq!(AgingTier::for_days_overdue(31), AgingTier::Days31To60);
        assert_eq!(AgingTier::for_days_overdue(60), AgingTier::Days31To60);
        assert_eq!(AgingTier::for_days_overdue(61), AgingTier::Over60);
    }

    #[test]
    fn risk_thresholds_are_strict() {
        let total = Money::from_major(100);
        assert_eq!(RiskRating::from_share(Money::from_major(41), total), RiskRating::Critical);
        assert_eq!(RiskRating::from_share(Money::from_major(40), total), RiskRating::Warning);
        assert_eq!(RiskRating::from_share(Money::from_major(20), total), RiskRating::Healthy);
        assert_eq!(RiskRating::from_share(Money::ZERO, Money::ZERO), RiskRating::Healthy);
    }

    #[test]
    fn report_groups_by_tier_and_debtor() {
        let now = Utc::now();
        let debts = vec![
            open_debt(DebtorKind::Customer, "a", "INV-1", 10_000, now + Duration::days(5)),
            open_debt(DebtorKind::Customer, "a", "INV-2", 5_000, now - Duration::days(10)),
            open_debt(DebtorKind::Customer, "b", "INV-3", 30_000, now - Duration::days(90)),
            open_debt(DebtorKind::Supplier, "s", "PO-1", 7_000, now - Duration::days(45)),
        ];

        let report = aging_report(&debts, DebtorKind::Customer, now);
        assert_eq!(report.total.minor(), 45_000);
        assert_eq!(report.current.count, 1);
        assert_eq!(report.days_1_30.amount.minor(), 5_000);
        assert_eq!(report.over_60.amount.minor(), 30_000);
        assert_eq!(report.risk, RiskRating::Critical);
        assert_eq!(report.by_debtor[0].debtor_id.as_str(), "b");
        assert_eq!(report.by_debtor[1].open_debts, 2);

        let overview = debt_overview(&debts, now);
        assert_eq!(overview.payables.days_31_60.amount.minor(), 7_000);
        assert_eq!(overview.net.minor(), 38_000);
    }

    #[test]
    fn settled_debts_are_not_aged() {
        let now = Utc::now();
        let mut d = open_debt(DebtorKind::Customer, "a", "INV-9", 100, now - Duration::days(100));
        run(&mut d, &pay(100)).unwrap();
        let debts = [d];
        let report = aging_report(&debts, DebtorKind::Customer, now);
        assert_eq!(report.total, Money::ZERO);
        assert!(overdue_debts(&debts, now).is_empty());
    }
}
