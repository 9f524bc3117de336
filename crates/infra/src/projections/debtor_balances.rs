//! Debtor balances projection.
//!
//! A cache of the outstanding amount per customer/supplier, fed by published
//! debt events. It can fall behind or drift (publication is best effort);
//! `BackOffice::reconcile_debtor_balances` recomputes the truth from the debt
//! streams and reports the difference.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use shopkeep_core::{AggregateId, Money};
use shopkeep_debts::{DebtEvent, DebtorKey, DEBT_AGGREGATE_TYPE};
use shopkeep_events::{EventEnvelope, Subscription};

use crate::event_store::{EventStore, EventStoreError};

#[derive(Debug, Error)]
pub enum DebtorBalanceError {
    #[error("failed to deserialize debt event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("event for debt {0} arrived before it was opened")]
    UnknownDebt(AggregateId),

    #[error("event store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("projection state is poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct State {
    balances: BTreeMap<DebtorKey, Money>,
    owners: HashMap<AggregateId, DebtorKey>,
    cursors: HashMap<AggregateId, u64>,
}

/// Outstanding amount per debtor, maintained from debt events.
///
/// Idempotent for at-least-once delivery: each debt stream's sequence
/// number is tracked and replays of seen events are ignored.
#[derive(Debug, Default)]
pub struct DebtorBalancesProjection {
    state: RwLock<State>,
}

impl DebtorBalancesProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cached balances.
    pub fn balances(&self) -> BTreeMap<DebtorKey, Money> {
        match self.state.read() {
            Ok(state) => state.balances.clone(),
            Err(_) => BTreeMap::new(),
        }
    }

    pub fn balance(&self, key: &DebtorKey) -> Money {
        match self.state.read() {
            Ok(state) => state.balances.get(key).copied().unwrap_or(Money::ZERO),
            Err(_) => Money::ZERO,
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), DebtorBalanceError> {
        if envelope.aggregate_type() != DEBT_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let mut state = self.state.write().map_err(|_| DebtorBalanceError::Poisoned)?;

        let last = state.cursors.get(&aggregate_id).copied().unwrap_or(0);
        if seq == 0 {
            return Err(DebtorBalanceError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(DebtorBalanceError::NonMonotonicSequence { last, found: seq });
        }

        let event: DebtEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| DebtorBalanceError::Deserialize(e.to_string()))?;

        let (key, change) = match event {
            DebtEvent::Opened(e) => {
                let key = (e.debtor_kind, e.debtor_id);
                state.owners.insert(aggregate_id, key.clone());
                (key, e.amount)
            }
            DebtEvent::PaymentRecorded(e) => (owner(&state, aggregate_id)?, -e.payment.amount),
            DebtEvent::WrittenOff(e) => (owner(&state, aggregate_id)?, -e.amount),
            DebtEvent::InstallmentsScheduled(_) => (owner(&state, aggregate_id)?, Money::ZERO),
        };

        let balance = state.balances.entry(key).or_insert(Money::ZERO);
        *balance += change;
        state.cursors.insert(aggregate_id, seq);
        Ok(())
    }

    /// Apply everything currently queued on `subscription`.
    pub fn drain(&self, subscription: &Subscription<EventEnvelope<JsonValue>>) -> Result<usize, DebtorBalanceError> {
        let mut applied = 0;
        while let Ok(envelope) = subscription.try_recv() {
            self.apply_envelope(&envelope)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Drop the cache and replay every debt stream from the store.
    pub fn rebuild<S: EventStore + ?Sized>(&self, store: &S) -> Result<(), DebtorBalanceError> {
        {
            let mut state = self.state.write().map_err(|_| DebtorBalanceError::Poisoned)?;
            *state = State::default();
        }
        let events = store.load_by_type(DEBT_AGGREGATE_TYPE)?;
        for event in &events {
            self.apply_envelope(&event.to_envelope())?;
        }
        debug!(events = events.len(), "debtor balances rebuilt");
        Ok(())
    }
}

fn owner(state: &State, aggregate_id: AggregateId) -> Result<DebtorKey, DebtorBalanceError> {
    state
        .owners
        .get(&aggregate_id)
        .cloned()
        .ok_or(DebtorBalanceError::UnknownDebt(aggregate_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shopkeep_debts::{DebtId, DebtOpened, DebtorId, DebtorKind, Payment, PaymentMethod, PaymentRecorded};
    use shopkeep_accounting::{Reference, ReferenceType};
    use shopkeep_core::ActorId;
    use uuid::Uuid;

    fn envelope(debt: AggregateId, seq: u64, event: &DebtEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            debt,
            DEBT_AGGREGATE_TYPE.to_string(),
            seq,
            seq,
            "debts.debt.test".to_string(),
            Utc::now(),
            serde_json::to_value(event).unwrap(),
        )
    }

    fn opened(debt: AggregateId, amount: i64) -> DebtEvent {
        DebtEvent::Opened(DebtOpened {
            debt_id: DebtId::new(debt),
            debtor_kind: DebtorKind::Customer,
            debtor_id: DebtorId::new("c-1").unwrap(),
            reference: Reference::new(ReferenceType::Invoice, "INV-1"),
            description: None,
            amount: Money::from_minor(amount),
            due_date: Utc::now(),
            opened_at: Utc::now(),
            opened_by: ActorId::new(),
        })
    }

    fn paid(debt: AggregateId, amount: i64) -> DebtEvent {
        DebtEvent::PaymentRecorded(PaymentRecorded {
            debt_id: DebtId::new(debt),
            payment: Payment {
                id: Uuid::now_v7(),
                amount: Money::from_minor(amount),
                method: PaymentMethod::Cash,
                paid_at: Utc::now(),
                note: None,
                recorded_by: ActorId::new(),
            },
            allocations: Vec::new(),
        })
    }

    fn key() -> DebtorKey {
        (DebtorKind::Customer, DebtorId::new("c-1").unwrap())
    }

    #[test]
    fn redelivered_events_are_ignored() {
        let projection = DebtorBalancesProjection::new();
        let debt = AggregateId::new();
        let first = envelope(debt, 1, &opened(debt, 1_000));
        let second = envelope(debt, 2, &paid(debt, 300));

        projection.apply_envelope(&first).unwrap();
        projection.apply_envelope(&second).unwrap();
        projection.apply_envelope(&second).unwrap();
        projection.apply_envelope(&first).unwrap();

        assert_eq!(projection.balance(&key()), Money::from_minor(700));
    }

    #[test]
    fn gaps_are_rejected() {
        let projection = DebtorBalancesProjection::new();
        let debt = AggregateId::new();
        projection.apply_envelope(&envelope(debt, 1, &opened(debt, 500))).unwrap();

        let err = projection
            .apply_envelope(&envelope(debt, 3, &paid(debt, 100)))
            .unwrap_err();
        assert!(matches!(err, DebtorBalanceError::NonMonotonicSequence { last: 1, found: 3 }));
        assert_eq!(projection.balance(&key()), Money::from_minor(500));
    }

    #[test]
    fn payment_before_open_is_an_error() {
        let projection = DebtorBalancesProjection::new();
        let debt = AggregateId::new();
        let err = projection
            .apply_envelope(&envelope(debt, 1, &paid(debt, 100)))
            .unwrap_err();
        assert!(matches!(err, DebtorBalanceError::UnknownDebt(id) if id == debt));
    }
}
