//! Read models rebuilt by replaying the event store.
//!
//! Every read goes through one `load_all`/`load_by_type` call, so a view
//! never mixes the before and after of a compound transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use shopkeep_accounting::{JournalEvent, PostedEntry, JOURNAL_AGGREGATE_TYPE};
use shopkeep_core::AggregateId;
use shopkeep_debts::{Debt, DebtId, DEBT_AGGREGATE_TYPE};
use shopkeep_inventory::{
    CountSession, CountSessionId, ProductId, ProductStock, StockEvent, StockMovement,
    COUNT_SESSION_AGGREGATE_TYPE, PRODUCT_AGGREGATE_TYPE,
};

use crate::dispatcher::{rehydrate, StreamAggregate};
use crate::error::EngineError;
use crate::event_store::{EventStore, StoredEvent};

/// A stock movement with its commit metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRecord {
    pub movement: StockMovement,
    pub global_position: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Everything the store holds, replayed at one global position.
#[derive(Debug, Clone, Default)]
pub struct ReadModel {
    pub entries: Vec<PostedEntry>,
    pub products: BTreeMap<ProductId, ProductStock>,
    pub debts: BTreeMap<DebtId, Debt>,
    pub sessions: BTreeMap<CountSessionId, CountSession>,
    pub movements: Vec<MovementRecord>,
    /// Global position of the last event replayed (0 for an empty store).
    pub position: u64,
}

impl ReadModel {
    pub fn load<S: EventStore + ?Sized>(store: &S) -> Result<Self, EngineError> {
        let events = store.load_all()?;
        let position = events.last().map(|e| e.global_position).unwrap_or(0);

        let mut by_type: BTreeMap<&str, Vec<StoredEvent>> = BTreeMap::new();
        for event in &events {
            by_type
                .entry(event.aggregate_type.as_str())
                .or_default()
                .push(event.clone());
        }
        let product_events = of_type(&by_type, PRODUCT_AGGREGATE_TYPE);
        Ok(Self {
            entries: posted_entries(of_type(&by_type, JOURNAL_AGGREGATE_TYPE))?,
            products: replay_streams::<ProductStock>(product_events)?
                .into_iter()
                .map(|(id, p)| (ProductId::new(id), p))
                .collect(),
            debts: replay_streams::<Debt>(of_type(&by_type, DEBT_AGGREGATE_TYPE))?
                .into_iter()
                .map(|(id, d)| (DebtId::new(id), d))
                .collect(),
            sessions: replay_streams::<CountSession>(of_type(&by_type, COUNT_SESSION_AGGREGATE_TYPE))?
                .into_iter()
                .map(|(id, s)| (CountSessionId::new(id), s))
                .collect(),
            movements: movement_records(product_events)?,
            position,
        })
    }

    /// Movement history, newest first; one product or all of them.
    pub fn movement_history(&self, product: Option<ProductId>) -> Vec<&MovementRecord> {
        let mut history: Vec<&MovementRecord> = self
            .movements
            .iter()
            .filter(|m| product.is_none_or(|p| m.movement.product_id == p))
            .collect();
        history.sort_by(|a, b| {
            b.movement
                .date
                .cmp(&a.movement.date)
                .then_with(|| b.global_position.cmp(&a.global_position))
        });
        history
    }
}

fn of_type<'a>(by_type: &'a BTreeMap<&str, Vec<StoredEvent>>, aggregate_type: &str) -> &'a [StoredEvent] {
    by_type.get(aggregate_type).map(Vec::as_slice).unwrap_or_default()
}

/// Posted journal entries, numbered by their position in the journal stream.
pub fn journal_entries<S: EventStore + ?Sized>(store: &S) -> Result<Vec<PostedEntry>, EngineError> {
    posted_entries(&store.load_by_type(JOURNAL_AGGREGATE_TYPE)?)
}

pub(crate) fn posted_entries(events: &[StoredEvent]) -> Result<Vec<PostedEntry>, EngineError> {
    events
        .iter()
        .map(|stored| -> Result<PostedEntry, EngineError> {
            let JournalEvent::EntryPosted(posted) = stored.decode::<JournalEvent>()?;
            Ok(PostedEntry {
                entry: posted.entry,
                entry_number: stored.sequence_number,
                global_position: stored.global_position,
                recorded_at: stored.recorded_at,
            })
        })
        .collect()
}

fn movement_records(events: &[StoredEvent]) -> Result<Vec<MovementRecord>, EngineError> {
    let mut records = Vec::new();
    for stored in events {
        if let StockEvent::MovementRecorded(movement) = stored.decode::<StockEvent>()? {
            records.push(MovementRecord {
                movement,
                global_position: stored.global_position,
                recorded_at: stored.recorded_at,
            });
        }
    }
    Ok(records)
}

/// Replay every stream in `events` (all of one aggregate type, in global
/// order) into its aggregate.
pub fn replay_streams<A: StreamAggregate>(
    events: &[StoredEvent],
) -> Result<BTreeMap<AggregateId, A>, EngineError> {
    let mut streams: BTreeMap<AggregateId, Vec<StoredEvent>> = BTreeMap::new();
    for event in events {
        streams.entry(event.aggregate_id).or_default().push(event.clone());
    }
    streams
        .into_iter()
        .map(|(id, history)| rehydrate::<A>(id, &history).map(|aggregate| (id, aggregate)))
        .collect()
}

/// Every stream of aggregate type `A`.
pub fn load_aggregates<A, S>(store: &S) -> Result<BTreeMap<AggregateId, A>, EngineError>
where
    A: StreamAggregate,
    S: EventStore + ?Sized,
{
    replay_streams(&store.load_by_type(A::AGGREGATE_TYPE)?)
}
