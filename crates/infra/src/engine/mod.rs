//! The back-office engine: every business operation as one unit of work.
//!
//! `BackOffice` is what invoice, purchase and counting workflows call. Each
//! write runs through the [`TransactionDispatcher`], so a compound operation
//! (a sale with its journal entries, stock movements and customer debt)
//! commits completely or not at all. Reads replay the store.

mod counts;
mod debts;
mod integrity;
mod journal;
mod stock;
mod transactions;

pub use counts::{CountClosed, StartCountRequest};
pub use debts::{OpenDebtRequest, PaymentReceipt};
pub use integrity::{IntegrityReport, IntegrityViolation};
pub use stock::RegisterProductRequest;
pub use transactions::{
    ExpenseRequest, IncomeRequest, PurchaseRequest, SaleRequest, SalesReturnRequest, StockLine,
    TransactionReceipt,
};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use shopkeep_accounting::{
    ChartOfAccounts, Journal, JournalCommand, JournalId, PostEntry, PostedEntry, JOURNAL_AGGREGATE_TYPE,
};
use shopkeep_core::{ActorId, AggregateId};
use shopkeep_events::{EventBus, EventEnvelope, InMemoryEventBus};

use crate::alerts::{scan_alerts, Alert};
use crate::config::EngineConfig;
use crate::dispatcher::{rehydrate, StreamAggregate, TransactionDispatcher, UnitOfWork};
use crate::error::EngineError;
use crate::event_store::{EventStore, InMemoryEventStore, PostgresEventStore, StoredEvent};
use crate::projections::read_model::posted_entries;
use crate::projections::ReadModel;

pub type EnvelopeBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// Engine façade over an event store and an event bus.
#[derive(Debug)]
pub struct BackOffice<S, B> {
    dispatcher: TransactionDispatcher<S, B>,
    config: EngineConfig,
    journal: JournalId,
}

impl<S, B> BackOffice<S, B> {
    pub fn new(store: S, bus: B, config: EngineConfig) -> Self {
        Self {
            dispatcher: TransactionDispatcher::new(store, bus, config.retry.clone()),
            config,
            journal: JournalId::main(),
        }
    }

    pub fn store(&self) -> &S {
        self.dispatcher.store()
    }

    pub fn bus(&self) -> &B {
        self.dispatcher.bus()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn accounts(&self) -> &ChartOfAccounts {
        &self.config.accounts
    }
}

impl BackOffice<InMemoryEventStore, EnvelopeBus> {
    /// Engine over an in-process store, for tests and single-process use.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(InMemoryEventStore::new(), InMemoryEventBus::new(), config)
    }
}

impl BackOffice<PostgresEventStore, EnvelopeBus> {
    /// Connect to `database_url` and create the schema if needed.
    ///
    /// Blocks; call from a plain thread, not from inside an async runtime.
    pub fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        let url = config
            .database_url
            .clone()
            .ok_or_else(|| EngineError::validation("database_url is not configured"))?;
        let store = PostgresEventStore::connect(&url, config.database_max_connections)?;
        store.migrate()?;
        Ok(Self::new(store, InMemoryEventBus::new(), config))
    }
}

impl<S, B> BackOffice<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Everything in the store, replayed at one position.
    pub fn read_model(&self) -> Result<ReadModel, EngineError> {
        ReadModel::load(self.store())
    }

    /// Low-stock and debt alerts under the configured thresholds.
    pub fn scan_alerts(&self, now: DateTime<Utc>) -> Result<Vec<Alert>, EngineError> {
        let model = self.read_model()?;
        Ok(scan_alerts(model.products.values(), model.debts.values(), &self.config.alerts, now))
    }

    /// Current state of one stream, outside any unit of work.
    fn load_one<A: StreamAggregate>(&self, id: AggregateId) -> Result<A, EngineError> {
        rehydrate(id, &self.store().load_stream(id)?)
    }

    /// Stage journal postings. Postings never depend on earlier entries, so
    /// the journal stream is appended without a version check.
    fn post(&self, uow: &mut UnitOfWork<'_, S>, entries: Vec<PostEntry>) -> Result<(), EngineError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut journal: Journal = uow.append_only(self.journal.0);
        for entry in entries {
            uow.execute(&mut journal, &JournalCommand::Post(entry))?;
        }
        Ok(())
    }
}

/// Journal entries among committed events, with their entry numbers.
fn committed_entries(events: &[StoredEvent]) -> Result<Vec<PostedEntry>, EngineError> {
    let journal: Vec<StoredEvent> = events
        .iter()
        .filter(|e| e.aggregate_type == JOURNAL_AGGREGATE_TYPE)
        .cloned()
        .collect();
    posted_entries(&journal)
}

/// Who did it and when; every write takes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub at: DateTime<Utc>,
}

impl Actor {
    pub fn new(id: ActorId, at: DateTime<Utc>) -> Self {
        Self { id, at }
    }

    /// `id` acting now.
    pub fn now(id: ActorId) -> Self {
        Self::new(id, Utc::now())
    }
}
