//! Installment schedules and payment allocation.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use shopkeep_core::{DomainError, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallmentInterval {
    Daily,
    Weekly,
    Monthly,
}

impl InstallmentInterval {
    /// Due date of the `n`-th installment (0-based) starting at `start`.
    ///
    /// Monthly steps keep the day of month, clamped to the month's end.
    pub fn nth_due_date(self, start: DateTime<Utc>, n: u32) -> Result<DateTime<Utc>, DomainError> {
        let due = match self {
            InstallmentInterval::Daily => start.checked_add_signed(Duration::days(i64::from(n))),
            InstallmentInterval::Weekly => start.checked_add_signed(Duration::weeks(i64::from(n))),
            InstallmentInterval::Monthly => start.checked_add_months(Months::new(n)),
        };
        due.ok_or_else(|| DomainError::validation("installment due date out of range"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    /// 1-based, unique within a debt across reschedules.
    pub number: u32,
    pub due_date: DateTime<Utc>,
    /// Still owed on this installment.
    pub amount: Money,
    pub status: InstallmentStatus,
}

impl Installment {
    pub fn is_pending(&self) -> bool {
        self.status == InstallmentStatus::Pending
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.due_date < now
    }
}

/// Split `remaining` into `count` installments spaced by `interval`.
///
/// All installments are equal except the first, which also carries the
/// division remainder: 100.00 in three parts is 33.34 + 33.33 + 33.33.
pub fn build_schedule(
    remaining: Money,
    count: u32,
    interval: InstallmentInterval,
    start: DateTime<Utc>,
    first_number: u32,
) -> Result<Vec<Installment>, DomainError> {
    if count < 2 {
        return Err(DomainError::validation("an installment plan needs at least two installments"));
    }
    if remaining.minor() < i64::from(count) {
        return Err(DomainError::validation(format!(
            "{remaining} cannot be split into {count} installments"
        )));
    }

    remaining
        .split(count)?
        .into_iter()
        .enumerate()
        .map(|(i, amount)| {
            let n = i as u32;
            Ok(Installment {
                number: first_number + n,
                due_date: interval.nth_due_date(start, n)?,
                amount,
                status: InstallmentStatus::Pending,
            })
        })
        .collect()
}

/// Portion of a payment applied to one installment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentAllocation {
    pub number: u32,
    pub amount: Money,
    /// Whether this allocation pays the installment off.
    pub settles: bool,
}

/// Allocate `amount` to pending installments, earliest due date first.
///
/// Whatever exceeds the pending total is simply not allocated.
pub fn allocate_payment(installments: &[Installment], amount: Money) -> Vec<InstallmentAllocation> {
    let mut pending: Vec<&Installment> = installments.iter().filter(|i| i.is_pending()).collect();
    pending.sort_by_key(|i| (i.due_date, i.number));

    let mut left = amount;
    let mut allocations = Vec::new();
    for installment in pending {
        if !left.is_positive() {
            break;
        }
        let applied = left.min(installment.amount);
        left -= applied;
        allocations.push(InstallmentAllocation {
            number: installment.number,
            amount: applied,
            settles: applied == installment.amount,
        });
    }
    allocations
}
