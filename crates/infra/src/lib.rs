//! Infrastructure layer: event store, unit-of-work dispatch, config, read
//! models and the `BackOffice` engine.

pub mod alerts;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event_store;
pub mod projections;
pub mod retry;


pub use alerts::{scan_alerts, Alert, AlertKind, AlertSettings, AlertSeverity, SuggestedAction};
pub use config::{ConfigError, EngineConfig};
pub use dispatcher::{Committed, TransactionDispatcher, UnitOfWork};
pub use engine::{Actor, BackOffice};
pub use error::{EngineError, ValidationError};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
pub use retry::{BackoffStrategy, RetryPolicy};
