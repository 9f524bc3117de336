use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopkeep_accounting::Reference;
use shopkeep_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, Money};
use shopkeep_events::Event;

use crate::installments::{
    allocate_payment, build_schedule, Installment, InstallmentAllocation, InstallmentInterval,
    InstallmentStatus,
};

pub const DEBT_AGGREGATE_TYPE: &str = "debts.debt";

/// Who owes whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebtorKind {
    /// A customer owes the store (receivable).
    Customer,
    /// The store owes a supplier (payable).
    Supplier,
}

impl DebtorKind {
    fn key(self) -> &'static str {
        match self {
            DebtorKind::Customer => "customer",
            DebtorKind::Supplier => "supplier",
        }
    }
}

/// External customer/supplier identifier. The engine does not own parties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebtorId(String);

impl DebtorId {
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("debtor id cannot be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DebtorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Debt identifier, derived from the debt's natural key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebtId(pub AggregateId);

impl DebtId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// One debt per (debtor, document): opening it twice hits the same stream.
    pub fn for_reference(kind: DebtorKind, debtor: &DebtorId, reference: &Reference) -> Self {
        let key = format!(
            "{}/{}/{:?}/{}",
            kind.key(),
            debtor.as_str(),
            reference.kind,
            reference.id
        );
        Self(AggregateId::derived(DEBT_AGGREGATE_TYPE, &key))
    }
}

impl core::fmt::Display for DebtId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebtStatus {
    Pending,
    Partial,
    Settled,
    #[serde(rename = "written-off")]
    WrittenOff,
}

impl DebtStatus {
    pub fn is_open(self) -> bool {
        matches!(self, DebtStatus::Pending | DebtStatus::Partial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Check,
    Card,
}

impl PaymentMethod {
    /// Bank transfers, checks and cards settle through the bank account.
    pub fn uses_bank(self) -> bool {
        !matches!(self, PaymentMethod::Cash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub note: Option<String>,
    pub recorded_by: ActorId,
}

/// Aggregate root: Debt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debt {
    id: DebtId,
    debtor_kind: DebtorKind,
    debtor_id: Option<DebtorId>,
    reference: Option<Reference>,
    description: Option<String>,
    original_amount: Money,
    remaining_amount: Money,
    written_off_amount: Money,
    status: DebtStatus,
    due_date: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    payments: Vec<Payment>,
    installments: Vec<Installment>,
    version: u64,
    created: bool,
}

impl Debt {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: DebtId) -> Self {
        Self {
            id,
            debtor_kind: DebtorKind::Customer,
            debtor_id: None,
            reference: None,
            description: None,
            original_amount: Money::ZERO,
            remaining_amount: Money::ZERO,
            written_off_amount: Money::ZERO,
            status: DebtStatus::Pending,
            due_date: None,
            opened_at: None,
            payments: Vec::new(),
            installments: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DebtId {
        self.id
    }

    pub fn is_opened(&self) -> bool {
        self.created
    }

    pub fn debtor_kind(&self) -> DebtorKind {
        self.debtor_kind
    }

    pub fn debtor_id(&self) -> Option<&DebtorId> {
        self.debtor_id.as_ref()
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn original_amount(&self) -> Money {
        self.original_amount
    }

    pub fn remaining_amount(&self) -> Money {
        self.remaining_amount
    }

    pub fn written_off_amount(&self) -> Money {
        self.written_off_amount
    }

    pub fn paid_amount(&self) -> Money {
        self.payments.iter().map(|p| p.amount).sum()
    }

    pub fn status(&self) -> DebtStatus {
        self.status
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn installments(&self) -> &[Installment] {
        &self.installments
    }

    pub fn pending_installments(&self) -> impl Iterator<Item = &Installment> {
        self.installments.iter().filter(|i| i.is_pending())
    }

    /// Unpaid past its due date. Read-side only; never stored.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.created && self.status.is_open() && self.due_date.is_some_and(|due| due < now)
    }

    pub fn overdue_installments(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Installment> {
        self.installments.iter().filter(move |i| i.is_overdue(now))
    }
}

impl AggregateRoot for Debt {
    type Id = DebtId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenDebt. Opening an existing debt is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDebt {
    pub debt_id: DebtId,
    pub debtor_kind: DebtorKind,
    pub debtor_id: DebtorId,
    pub reference: Reference,
    pub description: Option<String>,
    pub amount: Money,
    pub due_date: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub opened_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub payment_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub note: Option<String>,
    pub recorded_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOffDebt {
    pub reason: String,
    pub written_off_at: DateTime<Utc>,
    pub written_off_by: ActorId,
}

/// Command: ScheduleInstallments. Replaces any pending installments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInstallments {
    pub count: u32,
    pub interval: InstallmentInterval,
    pub start_date: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub scheduled_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebtCommand {
    Open(OpenDebt),
    RecordPayment(RecordPayment),
    WriteOff(WriteOffDebt),
    ScheduleInstallments(ScheduleInstallments),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtOpened {
    pub debt_id: DebtId,
    pub debtor_kind: DebtorKind,
    pub debtor_id: DebtorId,
    pub reference: Reference,
    pub description: Option<String>,
    pub amount: Money,
    pub due_date: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub opened_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub debt_id: DebtId,
    pub payment: Payment,
    pub allocations: Vec<InstallmentAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtWrittenOff {
    pub debt_id: DebtId,
    /// Remaining amount at the time of the write-off.
    pub amount: Money,
    pub reason: String,
    pub written_off_at: DateTime<Utc>,
    pub written_off_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentsScheduled {
    pub debt_id: DebtId,
    pub installments: Vec<Installment>,
    pub interval: InstallmentInterval,
    pub scheduled_at: DateTime<Utc>,
    pub scheduled_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebtEvent {
    Opened(DebtOpened),
    PaymentRecorded(PaymentRecorded),
    WrittenOff(DebtWrittenOff),
    InstallmentsScheduled(InstallmentsScheduled),
}

impl Event for DebtEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DebtEvent::Opened(_) => "debts.debt.opened",
            DebtEvent::PaymentRecorded(_) => "debts.debt.payment_recorded",
            DebtEvent::WrittenOff(_) => "debts.debt.written_off",
            DebtEvent::InstallmentsScheduled(_) => "debts.debt.installments_scheduled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DebtEvent::Opened(e) => e.opened_at,
            DebtEvent::PaymentRecorded(e) => e.payment.paid_at,
            DebtEvent::WrittenOff(e) => e.written_off_at,
            DebtEvent::InstallmentsScheduled(e) => e.scheduled_at,
        }
    }
}

impl Aggregate for Debt {
    type Command = DebtCommand;
    type Event = DebtEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DebtEvent::Opened(e) => {
                self.id = e.debt_id;
                self.debtor_kind = e.debtor_kind;
                self.debtor_id = Some(e.debtor_id.clone());
                self.reference = Some(e.reference.clone());
                self.description = e.description.clone();
                self.original_amount = e.amount;
                self.remaining_amount = e.amount;
                self.status = DebtStatus::Pending;
                self.due_date = Some(e.due_date);
                self.opened_at = Some(e.opened_at);
                self.created = true;
            }
            DebtEvent::PaymentRecorded(e) => {
                self.remaining_amount -= e.payment.amount;
                self.payments.push(e.payment.clone());
                for allocation in &e.allocations {
                    if let Some(installment) = self
                        .installments
                        .iter_mut()
                        .find(|i| i.number == allocation.number)
                    {
                        installment.amount -= allocation.amount;
                        if allocation.settles {
                            installment.status = InstallmentStatus::Paid;
                        }
                    }
                }
                self.status = if self.remaining_amount.is_zero() {
                    DebtStatus::Settled
                } else {
                    DebtStatus::Partial
                };
            }
            DebtEvent::WrittenOff(e) => {
                self.written_off_amount += e.amount;
                self.remaining_amount = Money::ZERO;
                self.installments.retain(|i| !i.is_pending());
                self.status = DebtStatus::WrittenOff;
            }
            DebtEvent::InstallmentsScheduled(e) => {
                self.installments.retain(|i| !i.is_pending());
                self.installments.extend(e.installments.iter().cloned());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DebtCommand::Open(cmd) => self.handle_open(cmd),
            DebtCommand::RecordPayment(cmd) => self.handle_payment(cmd),
            DebtCommand::WriteOff(cmd) => self.handle_write_off(cmd),
            DebtCommand::ScheduleInstallments(cmd) => self.handle_schedule(cmd),
        }
    }

    fn check_invariants(&self) -> Result<(), Self::Error> {
        if !self.created {
            return Ok(());
        }
        let fail = |what: &str| {
            Err(DomainError::invariant(format!("debt {}: {what}", self.id)))
        };

        if self.remaining_amount.is_negative() || self.remaining_amount > self.original_amount {
            return fail("remaining amount outside [0, original]");
        }
        if self.remaining_amount != self.original_amount - self.paid_amount() - self.written_off_amount {
            return fail("remaining amount does not match payments and write-offs");
        }
        let expected_status = match self.status {
            DebtStatus::WrittenOff => DebtStatus::WrittenOff,
            _ if self.remaining_amount.is_zero() => DebtStatus::Settled,
            _ if self.remaining_amount == self.original_amount => DebtStatus::Pending,
            _ => DebtStatus::Partial,
        };
        if self.status != expected_status {
            return fail("status does not match remaining amount");
        }
        let pending: Vec<&Installment> = self.pending_installments().collect();
        if !pending.is_empty() {
            let scheduled: Money = pending.iter().map(|i| i.amount).sum();
            if scheduled != self.remaining_amount {
                return fail("pending installments do not sum to the remaining amount");
            }
        }
        Ok(())
    }
}

impl Debt {
    fn ensure_opened(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    fn ensure_open_status(&self, action: &str) -> Result<(), DomainError> {
        match self.status {
            DebtStatus::Settled => Err(DomainError::invalid_state(format!(
                "cannot {action}: debt {} is settled",
                self.id
            ))),
            DebtStatus::WrittenOff => Err(DomainError::invalid_state(format!(
                "cannot {action}: debt {} is written off",
                self.id
            ))),
            DebtStatus::Pending | DebtStatus::Partial => Ok(()),
        }
    }

    fn handle_open(&self, cmd: &OpenDebt) -> Result<Vec<DebtEvent>, DomainError> {
        if self.created {
            return Ok(vec![]);
        }
        cmd.amount.ensure_transaction_amount()?;
        if cmd.reference.id.trim().is_empty() {
            return Err(DomainError::validation("debt reference id cannot be empty"));
        }

        Ok(vec![DebtEvent::Opened(DebtOpened {
            debt_id: cmd.debt_id,
            debtor_kind: cmd.debtor_kind,
            debtor_id: cmd.debtor_id.clone(),
            reference: cmd.reference.clone(),
            description: cmd.description.clone(),
            amount: cmd.amount,
            due_date: cmd.due_date,
            opened_at: cmd.opened_at,
            opened_by: cmd.opened_by,
        })])
    }

    fn handle_payment(&self, cmd: &RecordPayment) -> Result<Vec<DebtEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_open_status("record a payment")?;
        if !cmd.amount.is_positive() {
            return Err(DomainError::InvalidAmount(cmd.amount));
        }
        if cmd.amount > self.remaining_amount {
            return Err(DomainError::OverPayment {
                attempted: cmd.amount,
                remaining: self.remaining_amount,
            });
        }

        Ok(vec![DebtEvent::PaymentRecorded(PaymentRecorded {
            debt_id: self.id,
            payment: Payment {
                id: cmd.payment_id,
                amount: cmd.amount,
                method: cmd.method,
                paid_at: cmd.paid_at,
                note: cmd.note.clone(),
                recorded_by: cmd.recorded_by,
            },
            allocations: allocate_payment(&self.installments, cmd.amount),
        })])
    }

    fn handle_write_off(&self, cmd: &WriteOffDebt) -> Result<Vec<DebtEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_open_status("write off")?;
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("write-off reason cannot be empty"));
        }

        Ok(vec![DebtEvent::WrittenOff(DebtWrittenOff {
            debt_id: self.id,
            amount: self.remaining_amount,
            reason: reason.to_string(),
            written_off_at: cmd.written_off_at,
            written_off_by: cmd.written_off_by,
        })])
    }

    fn handle_schedule(&self, cmd: &ScheduleInstallments) -> Result<Vec<DebtEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_open_status("schedule installments")?;

        let next_number = self.installments.iter().map(|i| i.number).max().unwrap_or(0) + 1;
        let installments = build_schedule(
            self.remaining_amount,
            cmd.count,
            cmd.interval,
            cmd.start_date,
            next_number,
        )?;

        Ok(vec![DebtEvent::InstallmentsScheduled(InstallmentsScheduled {
            debt_id: self.id,
            installments,
            interval: cmd.interval,
            scheduled_at: cmd.scheduled_at,
            scheduled_by: cmd.scheduled_by,
        })])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use shopkeep_accounting::ReferenceType;

    pub(crate) fn open_debt(kind: DebtorKind, debtor: &str, reference: &str, minor: i64, due: DateTime<Utc>) -> Debt {
        let debtor_id = DebtorId::new(debtor).unwrap();
        let reference = Reference::new(ReferenceType::Invoice, reference);
        let id = DebtId::for_reference(kind, &debtor_id, &reference);
        let mut debt = Debt::empty(id);
        run(
            &mut debt,
            &DebtCommand::Open(OpenDebt {
                debt_id: id,
                debtor_kind: kind,
                debtor_id,
                reference,
                description: None,
                amount: Money::from_minor(minor),
                due_date: due,
                opened_at: Utc::now(),
                opened_by: ActorId::new(),
            }),
        )
        .unwrap();
        debt
    }

    pub(crate) fn run(debt: &mut Debt, cmd: &DebtCommand) -> Result<Vec<DebtEvent>, DomainError> {
        let events = debt.handle(cmd)?;
        for e in &events {
            debt.apply(e);
        }
        debt.check_invariants()?;
        Ok(events)
    }

    pub(crate) fn pay(minor: i64) -> DebtCommand {
        DebtCommand::RecordPayment(RecordPayment {
            payment_id: Uuid::now_v7(),
            amount: Money::from_minor(minor),
            method: PaymentMethod::Cash,
            paid_at: Utc::now(),
            note: None,
            recorded_by: ActorId::new(),
        })
    }

    fn write_off(reason: &str) -> DebtCommand {
        DebtCommand::WriteOff(WriteOffDebt {
            reason: reason.to_string(),
            written_off_at: Utc::now(),
            written_off_by: ActorId::new(),
        })
    }

    fn schedule(count: u32) -> DebtCommand {
        DebtCommand::ScheduleInstallments(ScheduleInstallments {
            count,
            interval: InstallmentInterval::Monthly,
            start_date: Utc::now(),
            scheduled_at: Utc::now(),
            scheduled_by: ActorId::new(),
        })
    }

    fn debt(minor: i64) -> Debt {
        open_debt(DebtorKind::Customer, "c-1", "INV-1", minor, Utc::now() + Duration::days(30))
    }

    #[test]
    fn payments_settle_and_extra_payment_is_rejected() {
        let mut d = debt(10_000);
        run(&mut d, &pay(4_000)).unwrap();
        assert_eq!(d.status(), DebtStatus::Partial);
        run(&mut d, &pay(6_000)).unwrap();
        assert_eq!(d.status(), DebtStatus::Settled);
        assert_eq!(d.remaining_amount(), Money::ZERO);

        let err = d.handle(&pay(1)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn overpayment_is_rejected_with_remaining() {
        let mut d = debt(10_000);
        run(&mut d, &pay(9_000)).unwrap();
        assert_eq!(
            d.handle(&pay(1_001)).unwrap_err(),
            DomainError::OverPayment {
                attempted: Money::from_minor(1_001),
                remaining: Money::from_minor(1_000)
            }
        );
    }

    #[test]
    fn opening_twice_is_idempotent() {
        let mut d = debt(10_000);
        let again = DebtCommand::Open(OpenDebt {
            debt_id: d.id_typed(),
            debtor_kind: DebtorKind::Customer,
            debtor_id: DebtorId::new("c-1").unwrap(),
            reference: Reference::new(ReferenceType::Invoice, "INV-1"),
            description: None,
            amount: Money::from_minor(55),
            due_date: Utc::now(),
            opened_at: Utc::now(),
            opened_by: ActorId::new(),
        });
        assert!(run(&mut d, &again).unwrap().is_empty());
        assert_eq!(d.original_amount(), Money::from_minor(10_000));
    }

    #[test]
    fn opening_above_the_amount_cap_is_rejected() {
        let debtor_id = DebtorId::new("c-1").unwrap();
        let reference = Reference::new(ReferenceType::Invoice, "INV-9");
        let id = DebtId::for_reference(DebtorKind::Customer, &debtor_id, &reference);
        let huge = Money::MAX + Money::from_minor(1);
        let open = DebtCommand::Open(OpenDebt {
            debt_id: id,
            debtor_kind: DebtorKind::Customer,
            debtor_id,
            reference,
            description: None,
            amount: huge,
            due_date: Utc::now(),
            opened_at: Utc::now(),
            opened_by: ActorId::new(),
        });
        assert_eq!(Debt::empty(id).handle(&open), Err(DomainError::InvalidAmount(huge)));
    }

    #[test]
    fn derived_ids_depend_on_the_whole_key() {
        let debtor = DebtorId::new("c-1").unwrap();
        let inv = Reference::new(ReferenceType::Invoice, "INV-1");
        assert_eq!(
            DebtId::for_reference(DebtorKind::Customer, &debtor, &inv),
            DebtId::for_reference(DebtorKind::Customer, &debtor, &inv)
        );
        assert_ne!(
            DebtId::for_reference(DebtorKind::Customer, &debtor, &inv),
            DebtId::for_reference(DebtorKind::Supplier, &debtor, &inv)
        );
    }

    #[test]
    fn write_off_zeroes_remaining_and_is_final() {
        let mut d = debt(10_000);
        run(&mut d, &pay(2_500)).unwrap();
        let events = run(&mut d, &write_off("customer closed shop")).unwrap();
        match &events[0] {
            DebtEvent::WrittenOff(e) => assert_eq!(e.amount, Money::from_minor(7_500)),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(d.status(), DebtStatus::WrittenOff);
        assert_eq!(d.remaining_amount(), Money::ZERO);
        assert!(matches!(d.handle(&write_off("again")), Err(DomainError::InvalidState(_))));
        assert!(matches!(d.handle(&pay(1)), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn settled_debt_cannot_be_written_off() {
        let mut d = debt(100);
        run(&mut d, &pay(100)).unwrap();
        assert!(matches!(d.handle(&write_off("x")), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn payments_consume_installments_in_due_order() {
        let mut d = debt(10_000);
        run(&mut d, &schedule(3)).unwrap();
        let amounts: Vec<i64> = d.installments().iter().map(|i| i.amount.minor()).collect();
        assert_eq!(amounts, vec![3_334, 3_333, 3_333]);

        run(&mut d, &pay(5_000)).unwrap();
        let statuses: Vec<InstallmentStatus> = d.installments().iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![InstallmentStatus::Paid, InstallmentStatus::Pending, InstallmentStatus::Pending]
        );
        assert_eq!(d.installments()[1].amount.minor(), 1_667);
    }

    #[test]
    fn rescheduling_replaces_pending_installments_only() {
        let mut d = debt(10_000);
        run(&mut d, &schedule(2)).unwrap();
        run(&mut d, &pay(5_000)).unwrap();
        run(&mut d, &schedule(5)).unwrap();

        assert_eq!(d.installments().len(), 6);
        assert_eq!(d.pending_installments().count(), 5);
        assert_eq!(
            d.pending_installments().map(|i| i.number).collect::<Vec<_>>(),
            vec![3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn overdue_is_a_read_side_predicate() {
        let past_due = open_debt(DebtorKind::Supplier, "s-1", "PO-1", 100, Utc::now() - Duration::days(1));
        assert!(past_due.is_overdue(Utc::now()));
        let mut paid = past_due.clone();
        run(&mut paid, &pay(100)).unwrap();
        assert!(!paid.is_overdue(Utc::now()));
    }

    proptest! {
        #[test]
        fn remaining_always_matches_payments(
            original in 1i64..1_000_000,
            payments in prop::collection::vec(1i64..200_000, 0..20)
        ) {
            let mut d = debt(original);
            for minor in payments {
                let _ = run(&mut d, &pay(minor));
                prop_assert!(d.check_invariants().is_ok());
            }
            prop_assert_eq!(d.remaining_amount(), d.original_amount() - d.paid_amount());
        }
    }
}
