//! Debt & collection tracking (event-sourced).
//!
//! Receivables and payables with partial payments, installment plans and
//! write-offs, plus read-side aging and balance reconciliation. Pure domain
//! logic; the journal entries mirroring payments are posted by the caller in
//! the same unit of work.

pub mod aging;
pub mod debt;
pub mod installments;
pub mod reconcile;

pub use aging::{
    aging_report, days_overdue, debt_overview, overdue_debts, AgingReport, AgingTier,
    DebtOverview, DebtorExposure, RiskRating, TierTotal,
};
pub use debt::{
    Debt, DebtCommand, DebtEvent, DebtId, DebtOpened, DebtStatus, DebtWrittenOff, DebtorId,
    DebtorKind, InstallmentsScheduled, OpenDebt, Payment, PaymentMethod, PaymentRecorded,
    RecordPayment, ScheduleInstallments, WriteOffDebt, DEBT_AGGREGATE_TYPE,
};
pub use installments::{
    allocate_payment, build_schedule, Installment, InstallmentAllocation, InstallmentInterval,
    InstallmentStatus,
};
pub use reconcile::{
    outstanding_by_debtor, reconcile_balances, BalanceDrift, BalanceReconciliation, DebtorKey,
};
