//! Unit-of-work execution for event-sourced aggregates.
//!
//! A business operation runs as a closure over a [`UnitOfWork`]:
//!
//! ```text
//! attempt
//!   ↓
//! 1. Load streams (replay history, remember the version seen)
//!   ↓
//! 2. Execute commands (handle → apply → check invariants → stage events)
//!   ↓
//! 3. Commit every touched stream atomically (optimistic version checks)
//!   ↓
//! 4. Publish committed events to the bus (best effort)
//! ```
//!
//! A `Conflict` or `PersistenceFailure` re-runs the whole closure from step 1
//! against fresh state, up to the retry policy's bound. Any other error
//! returns immediately and nothing is written.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shopkeep_accounting::{Journal, JournalId, JOURNAL_AGGREGATE_TYPE};
use shopkeep_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion};
use shopkeep_debts::{Debt, DebtId, DEBT_AGGREGATE_TYPE};
use shopkeep_events::{Event as DomainEvent, EventBus, EventEnvelope};
use shopkeep_inventory::{
    CountSession, CountSessionId, ProductId, ProductStock, COUNT_SESSION_AGGREGATE_TYPE,
    PRODUCT_AGGREGATE_TYPE,
};

use crate::error::EngineError;
use crate::event_store::{EventStore, StoredEvent, StreamAppend, UncommittedEvent};
use crate::retry::RetryPolicy;

/// An aggregate persisted as one event stream.
pub trait StreamAggregate:
    Aggregate<Error = DomainError, Event: DomainEvent + Serialize + DeserializeOwned> + Sized
{
    const AGGREGATE_TYPE: &'static str;

    /// Empty instance to replay history into.
    fn empty_stream(id: AggregateId) -> Self;

    fn stream_id(&self) -> AggregateId;
}

impl StreamAggregate for Journal {
    const AGGREGATE_TYPE: &'static str = JOURNAL_AGGREGATE_TYPE;

    fn empty_stream(id: AggregateId) -> Self {
        Journal::empty(JournalId::new(id))
    }

    fn stream_id(&self) -> AggregateId {
        self.id().0
    }
}

impl StreamAggregate for ProductStock {
    const AGGREGATE_TYPE: &'static str = PRODUCT_AGGREGATE_TYPE;

    fn empty_stream(id: AggregateId) -> Self {
        ProductStock::empty(ProductId::new(id))
    }

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

impl StreamAggregate for CountSession {
    const AGGREGATE_TYPE: &'static str = COUNT_SESSION_AGGREGATE_TYPE;

    fn empty_stream(id: AggregateId) -> Self {
        CountSession::empty(CountSessionId::new(id))
    }

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

impl StreamAggregate for Debt {
    const AGGREGATE_TYPE: &'static str = DEBT_AGGREGATE_TYPE;

    fn empty_stream(id: AggregateId) -> Self {
        Debt::empty(DebtId::new(id))
    }

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

/// Replay stored events into a fresh aggregate.
pub fn rehydrate<A>(id: AggregateId, history: &[StoredEvent]) -> Result<A, EngineError>
where
    A: StreamAggregate,
{
    let mut aggregate = A::empty_stream(id);
    for (idx, stored) in history.iter().enumerate() {
        if stored.aggregate_id != id || stored.aggregate_type != A::AGGREGATE_TYPE {
            return Err(EngineError::invariant(format!(
                "event {idx} of stream {id} belongs to {} '{}'",
                stored.aggregate_id, stored.aggregate_type
            )));
        }
        if stored.sequence_number != idx as u64 + 1 {
            return Err(EngineError::invariant(format!(
                "stream {id} has a gap at sequence {}",
                idx + 1
            )));
        }
        aggregate.apply(&stored.decode::<A::Event>()?);
    }
    Ok(aggregate)
}

/// Staged writes of one attempt. Dropped without effect unless committed.
pub struct UnitOfWork<'s, S: ?Sized> {
    store: &'s S,
    appends: Vec<StreamAppend>,
    index: HashMap<AggregateId, usize>,
}

impl<'s, S> UnitOfWork<'s, S>
where
    S: EventStore + ?Sized,
{
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            appends: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Load an aggregate, including events already staged in this unit of
    /// work. The stream is then checked against the version read here when
    /// the unit of work commits, even if nothing is written to it.
    pub fn load<A>(&mut self, id: AggregateId) -> Result<A, EngineError>
    where
        A: StreamAggregate,
    {
        let history = self.store.load_stream(id)?;
        let stored_version = history.len() as u64;
        let mut aggregate: A = rehydrate(id, &history)?;

        match self.index.get(&id).copied() {
            Some(i) => {
                let append = &self.appends[i];
                if let ExpectedVersion::Exact(seen) = append.expected_version {
                    if seen != stored_version {
                        return Err(EngineError::Conflict(format!(
                            "stream {id} moved from version {seen} to {stored_version} during the operation"
                        )));
                    }
                }
                for staged in &append.events {
                    let event: A::Event = serde_json::from_value(staged.payload.clone())
                        .map_err(|e| EngineError::invariant(format!("staged event: {e}")))?;
                    aggregate.apply(&event);
                }
            }
            None => self.register(id, A::AGGREGATE_TYPE, ExpectedVersion::Exact(stored_version)),
        }
        Ok(aggregate)
    }

    /// An empty aggregate for an append-only stream: its events are written
    /// without a version check. Only for aggregates whose decisions do not
    /// depend on earlier events of the stream.
    pub fn append_only<A>(&mut self, id: AggregateId) -> A
    where
        A: StreamAggregate,
    {
        if !self.index.contains_key(&id) {
            self.register(id, A::AGGREGATE_TYPE, ExpectedVersion::Any);
        }
        A::empty_stream(id)
    }

    /// Decide, apply and stage one command.
    ///
    /// The aggregate must come from `load` or `append_only` of this unit of
    /// work. An invariant failure after applying rejects the operation.
    pub fn execute<A>(&mut self, aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, EngineError>
    where
        A: StreamAggregate,
    {
        let id = aggregate.stream_id();
        let Some(&slot) = self.index.get(&id) else {
            return Err(EngineError::invariant(format!(
                "{} {id} was not loaded through this unit of work",
                A::AGGREGATE_TYPE
            )));
        };

        let events = aggregate
            .handle(command)
            .map_err(|e| EngineError::from_domain(e, || format!("{} {id}", A::AGGREGATE_TYPE)))?;

        for event in &events {
            aggregate.apply(event);
        }
        if let Err(violation) = aggregate.check_invariants() {
            error!(
                aggregate_type = A::AGGREGATE_TYPE,
                aggregate_id = %id,
                error = %violation,
                "invariant violated after applying command"
            );
            return Err(EngineError::invariant(violation.to_string()));
        }

        for event in &events {
            let staged = UncommittedEvent::from_typed(id, A::AGGREGATE_TYPE, Uuid::now_v7(), event)?;
            self.appends[slot].events.push(staged);
        }
        Ok(events)
    }

    pub fn staged_event_count(&self) -> usize {
        self.appends.iter().map(|a| a.events.len()).sum()
    }

    fn register(&mut self, id: AggregateId, aggregate_type: &str, expected: ExpectedVersion) {
        self.index.insert(id, self.appends.len());
        self.appends.push(StreamAppend::new(id, aggregate_type, expected));
    }

    fn commit(self) -> Result<Vec<StoredEvent>, EngineError> {
        if self.staged_event_count() == 0 {
            return Ok(Vec::new());
        }
        Ok(self.store.commit(self.appends)?)
    }
}

/// Result of a committed operation.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub events: Vec<StoredEvent>,
    pub attempts: u32,
}

/// Runs units of work against a store with bounded retry, then publishes.
#[derive(Debug)]
pub struct TransactionDispatcher<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
}

impl<S, B> TransactionDispatcher<S, B> {
    pub fn new(store: S, bus: B, retry: RetryPolicy) -> Self {
        Self { store, bus, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl<S, B> TransactionDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run `body` until it commits, fails with a non-retryable error, or the
    /// retry budget is spent. On exhaustion a retryable error surfaces as
    /// `Conflict` or `PersistenceFailure`.
    #[instrument(skip_all, fields(operation = operation))]
    pub fn run<T, F>(&self, operation: &str, mut body: F) -> Result<Committed<T>, EngineError>
    where
        F: FnMut(&mut UnitOfWork<'_, S>) -> Result<T, EngineError>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut uow = UnitOfWork::new(&self.store);
            let outcome = body(&mut uow).and_then(|value| Ok((value, uow.commit()?)));

            match outcome {
                Ok((value, events)) => {
                    info!(operation, attempts, events = events.len(), "operation committed");
                    self.publish(&events);
                    return Ok(Committed {
                        value,
                        events,
                        attempts,
                    });
                }
                Err(err) if err.is_retryable() && self.retry.should_retry(attempts) => {
                    let delay = self.retry.delay_for_retry(attempts);
                    warn!(
                        operation,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying operation"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    match &err {
                        EngineError::InternalInvariantViolation(_) => {
                            error!(operation, attempts, error = %err, "operation rejected")
                        }
                        e if e.is_retryable() => {
                            warn!(operation, attempts, error = %err, "retries exhausted")
                        }
                        _ => debug!(operation, error = %err, "operation rejected"),
                    }
                    return Err(match err {
                        EngineError::Conflict(msg) => EngineError::Conflict(format!(
                            "{operation}: gave up after {attempts} attempts: {msg}"
                        )),
                        other => other,
                    });
                }
            }
        }
    }

    /// Publication happens after commit; a failure loses nothing and is only
    /// logged. Consumers rebuild from the store.
    fn publish(&self, events: &[StoredEvent]) {
        for event in events {
            if let Err(err) = self.bus.publish(event.to_envelope()) {
                warn!(
                    global_position = event.global_position,
                    event_type = %event.event_type,
                    error = ?err,
                    "event publication failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use chrono::Utc;
    use shopkeep_core::{ActorId, Money};
    use shopkeep_events::InMemoryEventBus;
    use shopkeep_inventory::{
        Location, MovementMeta, ReceiveStock, RegisterProduct, StockCommand, StockLevels,
    };
    use std::time::Duration;

    type Dispatcher = TransactionDispatcher<InMemoryEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn dispatcher() -> Dispatcher {
        TransactionDispatcher::new(
            InMemoryEventStore::new(),
            InMemoryEventBus::new(),
            RetryPolicy::fixed(3, Duration::from_millis(1)),
        )
    }

    fn register(id: AggregateId) -> StockCommand {
        StockCommand::Register(RegisterProduct {
            product_id: ProductId::new(id),
            name: "Hammer".to_string(),
            category: None,
            unit_cost: Money::from_major(5),
            min_level: 0,
            opening: StockLevels { warehouse: 4, shop: 0 },
            date: Utc::now(),
            created_by: ActorId::new(),
        })
    }

    fn receive(quantity: i64) -> StockCommand {
        StockCommand::Receive(ReceiveStock {
            quantity,
            location: Location::Shop,
            meta: MovementMeta::new(Utc::now(), ActorId::new()),
        })
    }

    #[test]
    fn commits_and_publishes_in_order() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let id = AggregateId::new();

        let committed = d
            .run("register", |uow| {
                let mut p: ProductStock = uow.load(id)?;
                uow.execute(&mut p, &register(id))?;
                Ok(p.stock_qty())
            })
            .unwrap();

        assert_eq!(committed.value, 4);
        assert_eq!(committed.events.len(), 2);
        assert_eq!(sub.try_recv().unwrap().global_position(), 1);
        assert_eq!(sub.try_recv().unwrap().global_position(), 2);
    }

    #[test]
    fn rejected_command_writes_nothing() {
        let d = dispatcher();
        let id = AggregateId::new();

        let err = d
            .run("receive", |uow| {
                let mut p: ProductStock = uow.load(id)?;
                uow.execute(&mut p, &receive(3))?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, EngineError::NotFound(ref what) if what.contains(&id.to_string())));
        assert!(d.store().is_empty());
    }

    #[test]
    fn second_load_sees_staged_events() {
        let d = dispatcher();
        let id = AggregateId::new();

        d.run("register_then_receive", |uow| {
            let mut p: ProductStock = uow.load(id)?;
            uow.execute(&mut p, &register(id))?;
            let mut again: ProductStock = uow.load(id)?;
            assert_eq!(again.stock_qty(), 4);
            uow.execute(&mut again, &receive(1))?;
            Ok(())
        })
        .unwrap();

        let history = d.store().load_stream(id).unwrap();
        let p: ProductStock = rehydrate(id, &history).unwrap();
        assert_eq!(p.levels(), StockLevels { warehouse: 4, shop: 1 });
    }

    #[test]
    fn stale_read_is_retried_against_fresh_state() {
        let d = dispatcher();
        let id = AggregateId::new();
        d.run("register", |uow| {
            let mut p: ProductStock = uow.load(id)?;
            uow.execute(&mut p, &register(id))?;
            Ok(())
        })
        .unwrap();

        let mut interfered = false;
        let committed = d
            .run("receive", |uow| {
                let mut p: ProductStock = uow.load(id)?;
                if !interfered {
                    interfered = true;
                    // Another writer commits between our read and our commit.
                    d.run("other", |other| {
                        let mut q: ProductStock = other.load(id)?;
                        other.execute(&mut q, &receive(10))?;
                        Ok(())
                    })?;
                }
                uow.execute(&mut p, &receive(1))?;
                Ok(p.shop_qty())
            })
            .unwrap();

        assert_eq!(committed.attempts, 2);
        assert_eq!(committed.value, 11);
    }

    #[test]
    fn exhausted_retries_surface_conflict() {
        let d = TransactionDispatcher::new(
            InMemoryEventStore::new(),
            InMemoryEventBus::<EventEnvelope<JsonValue>>::new(),
            RetryPolicy::no_retry(),
        );
        let err = d
            .run("always_conflicts", |_uow| -> Result<(), EngineError> {
                Err(EngineError::Conflict("stale".into()))
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(ref msg) if msg.contains("1 attempts")));
    }
}
