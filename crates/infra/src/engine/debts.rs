use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use shopkeep_accounting::postings::{settlement_entry, write_off_entry};
use shopkeep_accounting::{PaymentChannel, PostedEntry, PostingContext, Reference, SettlementSide};
use shopkeep_core::Money;
use shopkeep_debts::{
    aging_report, debt_overview, outstanding_by_debtor, overdue_debts, reconcile_balances, AgingReport,
    BalanceReconciliation, Debt, DebtCommand, DebtEvent, DebtId, DebtOverview, DebtorId, DebtorKey,
    DebtorKind, InstallmentInterval, OpenDebt, Payment, PaymentMethod, RecordPayment,
    ScheduleInstallments, WriteOffDebt,
};
use shopkeep_events::{EventBus, EventEnvelope};

use super::{committed_entries, Actor, BackOffice};
use crate::dispatcher::UnitOfWork;
use crate::error::EngineError;
use crate::event_store::EventStore;
use crate::projections::load_aggregates;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDebtRequest {
    pub debtor_kind: DebtorKind,
    pub debtor_id: String,
    /// The invoice or purchase order the debt comes from.
    pub reference: Reference,
    pub description: Option<String>,
    pub amount: Money,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub debt: Debt,
    /// The cash/bank entry mirroring the payment.
    pub entry: PostedEntry,
}

/// What staging a debt does when the document already has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ExistingDebt {
    /// Return the debt unchanged.
    Keep,
    /// Fail with `InvalidState`: the document was already recorded.
    Reject,
}

fn settlement_side(kind: DebtorKind) -> SettlementSide {
    match kind {
        DebtorKind::Customer => SettlementSide::Receivable,
        DebtorKind::Supplier => SettlementSide::Payable,
    }
}

fn payment_channel(method: PaymentMethod) -> PaymentChannel {
    if method.uses_bank() {
        PaymentChannel::Bank
    } else {
        PaymentChannel::Cash
    }
}

impl<S, B> BackOffice<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a debt for a document. Opening the same (debtor, document) again
    /// returns the existing debt unchanged.
    pub fn open_debt(&self, request: OpenDebtRequest, actor: Actor) -> Result<Debt, EngineError> {
        let committed = self
            .dispatcher
            .run("open_debt", |uow| self.stage_open_debt(uow, &request, actor, ExistingDebt::Keep))?;
        let debt = committed.value;
        if committed.events.is_empty() {
            info!(debt_id = %debt.id_typed(), "debt already open for this document");
        } else {
            info!(debt_id = %debt.id_typed(), amount = %debt.original_amount(), "debt opened");
        }
        Ok(debt)
    }

    pub(super) fn stage_open_debt(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        request: &OpenDebtRequest,
        actor: Actor,
        existing: ExistingDebt,
    ) -> Result<Debt, EngineError> {
        let debtor_id = DebtorId::new(request.debtor_id.as_str())?;
        let debt_id = DebtId::for_reference(request.debtor_kind, &debtor_id, &request.reference);
        let mut debt: Debt = uow.load(debt_id.0)?;
        if debt.is_opened() && existing == ExistingDebt::Reject {
            return Err(EngineError::InvalidState(format!(
                "document {} already recorded for {}",
                request.reference.id, request.debtor_id
            )));
        }
        uow.execute(
            &mut debt,
            &DebtCommand::Open(OpenDebt {
                debt_id,
                debtor_kind: request.debtor_kind,
                debtor_id,
                reference: request.reference.clone(),
                description: request.description.clone(),
                amount: request.amount,
                due_date: request.due_date,
                opened_at: actor.at,
                opened_by: actor.id,
            }),
        )?;
        Ok(debt)
    }

    /// Record a payment and its cash/bank entry in one transaction.
    pub fn record_payment(
        &self,
        debt_id: DebtId,
        amount: Money,
        method: PaymentMethod,
        note: Option<String>,
        actor: Actor,
    ) -> Result<PaymentReceipt, EngineError> {
        let committed = self.dispatcher.run("record_payment", |uow| {
            let mut debt: Debt = uow.load(debt_id.0)?;
            let events = uow.execute(
                &mut debt,
                &DebtCommand::RecordPayment(RecordPayment {
                    payment_id: Uuid::now_v7(),
                    amount,
                    method,
                    paid_at: actor.at,
                    note: note.clone(),
                    recorded_by: actor.id,
                }),
            )?;
            let payment = events
                .into_iter()
                .find_map(|e| match e {
                    DebtEvent::PaymentRecorded(p) => Some(p.payment),
                    _ => None,
                })
                .ok_or_else(|| EngineError::invariant("payment accepted without a payment event"))?;

            let entry = settlement_entry(
                self.accounts(),
                &self.posting_context(&debt, actor),
                settlement_side(debt.debtor_kind()),
                payment.amount,
                payment_channel(method),
            )?;
            self.post(uow, vec![entry])?;
            Ok((payment, debt))
        })?;

        let (payment, debt) = committed.value;
        let entry = committed_entries(&committed.events)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::invariant("payment committed without its journal entry"))?;
        info!(
            debt_id = %debt_id,
            amount = %payment.amount,
            remaining = %debt.remaining_amount(),
            status = ?debt.status(),
            "payment recorded"
        );
        Ok(PaymentReceipt { payment, debt, entry })
    }

    /// Write the remaining balance off, with a bad-debt expense (receivable)
    /// or write-off gain (payable) entry. Irreversible.
    pub fn write_off_debt(&self, debt_id: DebtId, reason: &str, actor: Actor) -> Result<Debt, EngineError> {
        let committed = self.dispatcher.run("write_off_debt", |uow| {
            let mut debt: Debt = uow.load(debt_id.0)?;
            let events = uow.execute(
                &mut debt,
                &DebtCommand::WriteOff(WriteOffDebt {
                    reason: reason.to_string(),
                    written_off_at: actor.at,
                    written_off_by: actor.id,
                }),
            )?;
            let amount = events
                .iter()
                .find_map(|e| match e {
                    DebtEvent::WrittenOff(w) => Some(w.amount),
                    _ => None,
                })
                .unwrap_or(Money::ZERO);
            if amount.is_positive() {
                let entry = write_off_entry(
                    self.accounts(),
                    &self.posting_context(&debt, actor),
                    settlement_side(debt.debtor_kind()),
                    amount,
                    reason,
                );
                self.post(uow, vec![entry])?;
            }
            Ok(debt)
        })?;
        info!(debt_id = %debt_id, amount = %committed.value.written_off_amount(), "debt written off");
        Ok(committed.value)
    }

    /// Replace the pending installments with `count` new ones.
    pub fn schedule_installments(
        &self,
        debt_id: DebtId,
        count: u32,
        interval: InstallmentInterval,
        start_date: DateTime<Utc>,
        actor: Actor,
    ) -> Result<Debt, EngineError> {
        let committed = self.dispatcher.run("schedule_installments", |uow| {
            let mut debt: Debt = uow.load(debt_id.0)?;
            uow.execute(
                &mut debt,
                &DebtCommand::ScheduleInstallments(ScheduleInstallments {
                    count,
                    interval,
                    start_date,
                    scheduled_at: actor.at,
                    scheduled_by: actor.id,
                }),
            )?;
            Ok(debt)
        })?;
        Ok(committed.value)
    }

    pub fn debt(&self, debt_id: DebtId) -> Result<Debt, EngineError> {
        let debt: Debt = self.load_one(debt_id.0)?;
        if !debt.is_opened() {
            return Err(EngineError::not_found(format!("debt {debt_id}")));
        }
        Ok(debt)
    }

    pub fn debts(&self) -> Result<Vec<Debt>, EngineError> {
        Ok(load_aggregates::<Debt, _>(self.store())?
            .into_values()
            .filter(Debt::is_opened)
            .collect())
    }

    pub fn aging_report(&self, kind: DebtorKind, now: DateTime<Utc>) -> Result<AgingReport, EngineError> {
        Ok(aging_report(&self.debts()?, kind, now))
    }

    pub fn debt_overview(&self, now: DateTime<Utc>) -> Result<DebtOverview, EngineError> {
        Ok(debt_overview(&self.debts()?, now))
    }

    /// Open debts past due, most overdue first.
    pub fn overdue_debts(&self, now: DateTime<Utc>) -> Result<Vec<Debt>, EngineError> {
        let debts = self.debts()?;
        Ok(overdue_debts(&debts, now).into_iter().cloned().collect())
    }

    pub fn outstanding_by_debtor(&self) -> Result<BTreeMap<DebtorKey, Money>, EngineError> {
        Ok(outstanding_by_debtor(&self.debts()?))
    }

    /// Compare a cached per-debtor balance map with the debt streams.
    pub fn reconcile_debtor_balances(
        &self,
        cached: &BTreeMap<DebtorKey, Money>,
    ) -> Result<BalanceReconciliation, EngineError> {
        let result = reconcile_balances(&self.debts()?, cached);
        if !result.is_clean() {
            warn!(
                checked = result.checked,
                drifted = result.drifts.len(),
                "cached debtor balances drifted"
            );
        }
        Ok(result)
    }

    fn posting_context(&self, debt: &Debt, actor: Actor) -> PostingContext {
        let ctx = PostingContext::new(actor.at, actor.id);
        match debt.reference() {
            Some(reference) => ctx.with_reference(reference.clone()),
            None => ctx,
        }
    }
}
