//! Append-only event store boundary.
//!
//! Streams (one per aggregate) plus a global commit order. Backends:
//! [`InMemoryEventStore`] for tests/dev, [`PostgresEventStore`] for
//! durable storage.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
