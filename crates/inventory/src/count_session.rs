//! Physical inventory count sessions.
//!
//! A session freezes the system quantity of every product in scope when it
//! starts, collects counts while open, and is closed exactly once by a
//! reconciliation step (see [`crate::reconcile`]).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopkeep_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError};
use shopkeep_events::Event;

use crate::product::{Location, ProductId, ProductStock, MAX_STOCK_QUANTITY};
use crate::reconcile::ReconciliationReport;

pub const COUNT_SESSION_AGGREGATE_TYPE: &str = "inventory.count_session";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountSessionId(pub AggregateId);

impl CountSessionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CountSessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Which stock a session counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountScope {
    Warehouse,
    Shop,
    Both,
}

impl CountScope {
    /// System quantity of `product` as seen by this scope.
    pub fn system_qty(self, product: &ProductStock) -> i64 {
        match self {
            CountScope::Warehouse => product.quantity_at(Location::Warehouse),
            CountScope::Shop => product.quantity_at(Location::Shop),
            CountScope::Both => product.stock_qty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Open,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_id: ProductId,
    pub name: String,
    pub system_qty: i64,
}

/// Snapshot of every registered product matching `scope` and `category`.
///
/// Category matching is exact after trimming.
pub fn snapshot_lines<'a>(
    products: impl IntoIterator<Item = &'a ProductStock>,
    scope: CountScope,
    category: Option<&str>,
) -> Vec<SnapshotLine> {
    let category = category.map(str::trim).filter(|c| !c.is_empty());
    products
        .into_iter()
        .filter(|p| p.is_registered())
        .filter(|p| category.is_none_or(|c| p.category() == Some(c)))
        .map(|p| SnapshotLine {
            product_id: p.id_typed(),
            name: p.name().to_string(),
            system_qty: scope.system_qty(p),
        })
        .collect()
}

/// A row of the sheet handed to counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSheetLine {
    pub product_id: ProductId,
    pub name: String,
    /// Hidden (`None`) for blind counts.
    pub system_qty: Option<i64>,
    pub counted: Option<i64>,
}

/// Aggregate root: CountSession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountSession {
    id: CountSessionId,
    scope: CountScope,
    category: Option<String>,
    blind: bool,
    started_at: Option<DateTime<Utc>>,
    snapshot: BTreeMap<ProductId, SnapshotLine>,
    counts: BTreeMap<ProductId, i64>,
    status: Option<SessionStatus>,
    report: Option<ReconciliationReport>,
    version: u64,
}

impl CountSession {
    pub fn empty(id: CountSessionId) -> Self {
        Self {
            id,
            scope: CountScope::Both,
            category: None,
            blind: false,
            started_at: None,
            snapshot: BTreeMap::new(),
            counts: BTreeMap::new(),
            status: None,
            report: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> CountSessionId {
        self.id
    }

    pub fn scope(&self) -> CountScope {
        self.scope
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn is_blind(&self) -> bool {
        self.blind
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// `None` until the session is started.
    pub fn status(&self) -> Option<SessionStatus> {
        self.status
    }

    pub fn snapshot_qty(&self, product_id: &ProductId) -> Option<i64> {
        self.snapshot.get(product_id).map(|l| l.system_qty)
    }

    pub fn snapshot(&self) -> impl Iterator<Item = &SnapshotLine> {
        self.snapshot.values()
    }

    pub fn counts(&self) -> &BTreeMap<ProductId, i64> {
        &self.counts
    }

    /// Outcome recorded at close.
    pub fn report(&self) -> Option<&ReconciliationReport> {
        self.report.as_ref()
    }

    /// Count sheet in snapshot order. System quantities are hidden when the
    /// session is blind; the snapshot itself is always kept.
    pub fn count_sheet(&self) -> Vec<CountSheetLine> {
        self.snapshot
            .values()
            .map(|line| CountSheetLine {
                product_id: line.product_id,
                name: line.name.clone(),
                system_qty: (!self.blind).then_some(line.system_qty),
                counted: self.counts.get(&line.product_id).copied(),
            })
            .collect()
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        match self.status {
            Some(SessionStatus::Open) => Ok(()),
            None => Err(DomainError::NotFound),
            Some(status) => Err(DomainError::invalid_state(format!(
                "count session {} is {status:?}",
                self.id
            ))),
        }
    }
}

impl AggregateRoot for CountSession {
    type Id = CountSessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCount {
    pub session_id: CountSessionId,
    pub scope: CountScope,
    pub category: Option<String>,
    pub blind: bool,
    pub snapshot: Vec<SnapshotLine>,
    pub started_at: DateTime<Utc>,
    pub started_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCount {
    pub product_id: ProductId,
    pub counted: i64,
    pub counted_at: DateTime<Utc>,
    pub counted_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseCount {
    pub report: ReconciliationReport,
    pub closed_at: DateTime<Utc>,
    pub closed_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCount {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountCommand {
    Start(StartCount),
    Submit(SubmitCount),
    Close(CloseCount),
    Cancel(CancelCount),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountStarted {
    pub session_id: CountSessionId,
    pub scope: CountScope,
    pub category: Option<String>,
    pub blind: bool,
    pub snapshot: Vec<SnapshotLine>,
    pub started_at: DateTime<Utc>,
    pub started_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSubmitted {
    pub product_id: ProductId,
    pub counted: i64,
    pub counted_at: DateTime<Utc>,
    pub counted_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountClosed {
    pub report: ReconciliationReport,
    pub closed_at: DateTime<Utc>,
    pub closed_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCancelled {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountEvent {
    Started(CountStarted),
    CountSubmitted(CountSubmitted),
    Closed(CountClosed),
    Cancelled(CountCancelled),
}

impl Event for CountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CountEvent::Started(_) => "inventory.count_session.started",
            CountEvent::CountSubmitted(_) => "inventory.count_session.count_submitted",
            CountEvent::Closed(_) => "inventory.count_session.closed",
            CountEvent::Cancelled(_) => "inventory.count_session.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CountEvent::Started(e) => e.started_at,
            CountEvent::CountSubmitted(e) => e.counted_at,
            CountEvent::Closed(e) => e.closed_at,
            CountEvent::Cancelled(e) => e.cancelled_at,
        }
    }
}

impl Aggregate for CountSession {
    type Command = CountCommand;
    type Event = CountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CountEvent::Started(e) => {
                self.id = e.session_id;
                self.scope = e.scope;
                self.category = e.category.clone();
                self.blind = e.blind;
                self.started_at = Some(e.started_at);
                self.snapshot = e
                    .snapshot
                    .iter()
                    .map(|line| (line.product_id, line.clone()))
                    .collect();
                self.status = Some(SessionStatus::Open);
            }
            CountEvent::CountSubmitted(e) => {
                self.counts.insert(e.product_id, e.counted);
            }
            CountEvent::Closed(e) => {
                self.report = Some(e.report.clone());
                self.status = Some(SessionStatus::Closed);
            }
            CountEvent::Cancelled(_) => {
                self.status = Some(SessionStatus::Cancelled);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CountCommand::Start(cmd) => {
                if self.status.is_some() {
                    return Err(DomainError::conflict("count session already started"));
                }
                Ok(vec![CountEvent::Started(CountStarted {
                    session_id: cmd.session_id,
                    scope: cmd.scope,
                    category: cmd.category.clone(),
                    blind: cmd.blind,
                    snapshot: cmd.snapshot.clone(),
                    started_at: cmd.started_at,
                    started_by: cmd.started_by,
                })])
            }
            CountCommand::Submit(cmd) => {
                self.ensure_open()?;
                if cmd.counted < 0 {
                    return Err(DomainError::validation("counted quantity cannot be negative"));
                }
                if cmd.counted > 2 * MAX_STOCK_QUANTITY {
                    return Err(DomainError::validation(format!(
                        "counted quantity {} is above the stock limit",
                        cmd.counted
                    )));
                }
                if !self.snapshot.contains_key(&cmd.product_id) {
                    return Err(DomainError::validation(format!(
                        "product {} is not part of this count",
                        cmd.product_id
                    )));
                }
                Ok(vec![CountEvent::CountSubmitted(CountSubmitted {
                    product_id: cmd.product_id,
                    counted: cmd.counted,
                    counted_at: cmd.counted_at,
                    counted_by: cmd.counted_by,
                })])
            }
            CountCommand::Close(cmd) => {
                self.ensure_open()?;
                Ok(vec![CountEvent::Closed(CountClosed {
                    report: cmd.report.clone(),
                    closed_at: cmd.closed_at,
                    closed_by: cmd.closed_by,
                })])
            }
            CountCommand::Cancel(cmd) => {
                self.ensure_open()?;
                Ok(vec![CountEvent::Cancelled(CountCancelled {
                    reason: cmd.reason.trim().to_string(),
                    cancelled_at: cmd.cancelled_at,
                    cancelled_by: cmd.cancelled_by,
                })])
            }
        }
    }

    fn check_invariants(&self) -> Result<(), Self::Error> {
        if let Some(id) = self.counts.keys().find(|id| !self.snapshot.contains_key(id)) {
            return Err(DomainError::invariant(format!(
                "count session {}: count for product {id} outside the snapshot",
                self.id
            )));
        }
        if self.counts.values().any(|&c| c < 0) {
            return Err(DomainError::invariant(format!(
                "count session {}: negative count",
                self.id
            )));
        }
        Ok(())
    }
}
