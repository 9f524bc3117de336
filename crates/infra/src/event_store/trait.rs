use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use shopkeep_core::{AggregateId, ExpectedVersion};
use shopkeep_events::EventEnvelope;
use std::sync::Arc;

/// An event ready to be committed (not yet assigned a position).
///
/// Lifecycle:
///
/// 1. **Domain event**: produced by an aggregate's `handle()`
/// 2. **UncommittedEvent**: serialized payload plus stream metadata
/// 3. **StoredEvent**: committed, with stream sequence and global position
/// 4. **EventEnvelope**: published to the bus for read-only consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Serialize a typed domain event, keeping the metadata needed to decode
    /// it again on replay.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: shopkeep_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::Serialization(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A committed event.
///
/// - `sequence_number`: 1-based position in the aggregate stream, gap-free.
/// - `global_position`: 1-based position across every stream, in commit order.
/// - `recorded_at`: store commit time, strictly increasing with `global_position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub sequence_number: u64,
    pub global_position: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Deserialize the payload back into the aggregate's event type.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, EventStoreError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            EventStoreError::Serialization(format!(
                "cannot decode {} #{} of {}: {e}",
                self.event_type, self.sequence_number, self.aggregate_id
            ))
        })
    }

    /// Envelope for publication to the bus.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.global_position,
            self.event_type.clone(),
            self.recorded_at,
            self.payload.clone(),
        )
    }
}

/// Events for one stream inside an atomic commit.
///
/// An append with no events still checks `expected_version`: it guards a
/// stream that was read but not written by the unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

impl StreamAppend {
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        expected_version: ExpectedVersion,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            expected_version,
            events: Vec::new(),
        }
    }

    pub fn is_guard(&self) -> bool {
        self.events.is_empty()
    }

    /// Every event must target this append's stream and type.
    pub(crate) fn validate(&self) -> Result<(), EventStoreError> {
        for (idx, e) in self.events.iter().enumerate() {
            if e.aggregate_id != self.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "event {idx} targets {} inside the append for {}",
                    e.aggregate_id, self.aggregate_id
                )));
            }
            if e.aggregate_type != self.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "event {idx} has type '{}' inside a '{}' append",
                    e.aggregate_type, self.aggregate_type
                )));
            }
        }
        Ok(())
    }
}

/// Check a batch before touching storage: one append per stream, each
/// internally consistent.
pub(crate) fn validate_batch(appends: &[StreamAppend]) -> Result<(), EventStoreError> {
    let mut seen = std::collections::HashSet::new();
    for append in appends {
        if !seen.insert(append.aggregate_id) {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream {} appears twice in one commit",
                append.aggregate_id
            )));
        }
        append.validate()?;
    }
    Ok(())
}

/// Event store operation error.
///
/// Infrastructure failures (storage, concurrency, encoding), as opposed to
/// domain errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// A stream was not at the expected version.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A stream already holds events of another aggregate type.
    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    /// The batch itself is malformed.
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The backend could not be reached or failed mid-operation.
    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

impl EventStoreError {
    /// Whether re-running the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventStoreError::Concurrency(_) | EventStoreError::Unavailable(_))
    }
}

/// Append-only event store with atomic multi-stream commits.
///
/// Streams are keyed by aggregate id and hold gap-free sequence numbers
/// starting at 1. A `commit` is all or nothing: if any stream fails its
/// version check, nothing is written. Committed events also get a global
/// position, so every reader observes compound transactions whole.
pub trait EventStore: Send + Sync {
    /// Atomically append to one or more streams.
    fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load one stream in sequence order. Empty if the stream does not exist.
    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Every committed event in global order.
    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Committed events of one aggregate type in global order.
    fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).commit(appends)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all()
    }

    fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_by_type(aggregate_type)
    }
}

/// Next commit timestamp: wall clock, but never at or before `last`.
pub(crate) fn next_recorded_at(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match last {
        Some(last) if now <= last => last + chrono::Duration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_at_never_goes_backwards() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(5);
        assert_eq!(next_recorded_at(None, now), now);
        assert_eq!(next_recorded_at(Some(earlier), now), now);
        assert_eq!(
            next_recorded_at(Some(now), earlier),
            now + chrono::Duration::microseconds(1)
        );
    }

    #[test]
    fn batch_rejects_the_same_stream_twice() {
        let id = AggregateId::new();
        let a = StreamAppend::new(id, "t", ExpectedVersion::Any);
        let err = validate_batch(&[a.clone(), a]).unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn only_concurrency_and_outages_are_retryable() {
        assert!(EventStoreError::Concurrency("x".into()).is_retryable());
        assert!(EventStoreError::Unavailable("x".into()).is_retryable());
        assert!(!EventStoreError::InvalidAppend("x".into()).is_retryable());
    }
}
