use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use shopkeep_core::AggregateId;

use super::r#trait::{
    next_recorded_at, validate_batch, EventStore, EventStoreError, StoredEvent, StreamAppend,
};

#[derive(Debug)]
struct Stream {
    aggregate_type: String,
    /// Indexes into the global log, in sequence order.
    positions: Vec<usize>,
}

#[derive(Debug, Default)]
struct StoreState {
    streams: HashMap<AggregateId, Stream>,
    log: Vec<StoredEvent>,
    last_recorded_at: Option<DateTime<Utc>>,
}

impl StoreState {
    fn current_version(&self, aggregate_id: &AggregateId) -> u64 {
        self.streams
            .get(aggregate_id)
            .map(|s| s.positions.len() as u64)
            .unwrap_or(0)
    }
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. One lock guards every stream and the global log,
/// so a commit is checked and written as a single step.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    state: RwLock<StoreState>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed events across all streams.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> EventStoreError {
    EventStoreError::Unavailable("lock poisoned".to_string())
}

impl EventStore for InMemoryEventStore {
    fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        validate_batch(&appends)?;

        let mut state = self.state.write().map_err(|_| poisoned())?;

        // Check every stream before writing anything.
        for append in &appends {
            let current = state.current_version(&append.aggregate_id);
            if !append.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    append.aggregate_id, append.expected_version
                )));
            }
            if let Some(existing) = state.streams.get(&append.aggregate_id) {
                if existing.aggregate_type != append.aggregate_type && !append.is_guard() {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, append.aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for append in appends.into_iter().filter(|a| !a.is_guard()) {
            let mut next = state.current_version(&append.aggregate_id) + 1;
            for e in append.events {
                let recorded_at = next_recorded_at(state.last_recorded_at, Utc::now());
                state.last_recorded_at = Some(recorded_at);

                let index = state.log.len();
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    global_position: index as u64 + 1,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    recorded_at,
                    payload: e.payload,
                };
                next += 1;

                state
                    .streams
                    .entry(append.aggregate_id)
                    .or_insert_with(|| Stream {
                        aggregate_type: append.aggregate_type.clone(),
                        positions: Vec::new(),
                    })
                    .positions
                    .push(index);
                state.log.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .streams
            .get(&aggregate_id)
            .map(|s| s.positions.iter().map(|&i| state.log[i].clone()).collect())
            .unwrap_or_default())
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.log.clone())
    }

    fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .log
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::UncommittedEvent;
    use serde_json::json;
    use shopkeep_core::ExpectedVersion;
    use uuid::Uuid;

    fn raw(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({"n": 1}),
        }
    }

    fn append(
        aggregate_id: AggregateId,
        expected: ExpectedVersion,
        count: usize,
    ) -> StreamAppend {
        let mut a = StreamAppend::new(aggregate_id, "test", expected);
        a.events = (0..count).map(|_| raw(aggregate_id, "test")).collect();
        a
    }

    #[test]
    fn commit_assigns_stream_and_global_positions() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        store.commit(vec![append(a, ExpectedVersion::Exact(0), 2)]).unwrap();
        let committed = store
            .commit(vec![
                append(a, ExpectedVersion::Exact(2), 1),
                append(b, ExpectedVersion::Exact(0), 1),
            ])
            .unwrap();

        let seqs: Vec<(u64, u64)> = committed
            .iter()
            .map(|e| (e.sequence_number, e.global_position))
            .collect();
        assert_eq!(seqs, vec![(3, 3), (1, 4)]);

        let all = store.load_all().unwrap();
        assert!(all.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));
        assert_eq!(store.load_stream(a).unwrap().len(), 3);
    }

    #[test]
    fn one_stale_stream_rejects_the_whole_commit() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.commit(vec![append(a, ExpectedVersion::Exact(0), 1)]).unwrap();

        let err = store
            .commit(vec![
                append(b, ExpectedVersion::Exact(0), 1),
                append(a, ExpectedVersion::Exact(0), 1),
            ])
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(b).unwrap().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn guard_checks_version_without_writing() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        store.commit(vec![append(a, ExpectedVersion::Exact(0), 1)]).unwrap();

        assert!(store.commit(vec![append(a, ExpectedVersion::Exact(1), 0)]).unwrap().is_empty());
        let err = store.commit(vec![append(a, ExpectedVersion::Exact(0), 0)]).unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn stream_type_is_stable() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        store.commit(vec![append(a, ExpectedVersion::Any, 1)]).unwrap();

        let mut other = StreamAppend::new(a, "other", ExpectedVersion::Any);
        other.events.push(raw(a, "other"));
        let err = store.commit(vec![other]).unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
        assert_eq!(store.load_by_type("test").unwrap().len(), 1);
        assert!(store.load_by_type("other").unwrap().is_empty());
    }
}
