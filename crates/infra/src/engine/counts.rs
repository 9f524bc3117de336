use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use shopkeep_accounting::postings::inventory_variance_entries;
use shopkeep_accounting::{PostedEntry, PostingContext, Reference, ReferenceType};
use shopkeep_core::AggregateId;
use shopkeep_events::{EventBus, EventEnvelope};
use shopkeep_inventory::{
    plan_reconciliation, snapshot_lines, AdjustStock, CancelCount, CloseCount, CountCommand,
    CountScope, CountSession, CountSessionId, CountSheetLine, MovementMeta, ProductId, ProductStock,
    ReconciliationReport, StartCount, StockCommand, SubmitCount,
};

use super::{committed_entries, Actor, BackOffice};
use crate::error::EngineError;
use crate::event_store::EventStore;
use crate::projections::load_aggregates;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCountRequest {
    pub scope: CountScope,
    pub category: Option<String>,
    /// Hide system quantities from the count sheet.
    pub blind: bool,
}

/// Outcome of closing a count session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountClosed {
    pub session: CountSession,
    pub report: ReconciliationReport,
    /// Shortage and/or surplus valuation entries.
    pub entries: Vec<PostedEntry>,
}

impl<S, B> BackOffice<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a session and snapshot every matching product.
    pub fn start_count(&self, request: StartCountRequest, actor: Actor) -> Result<CountSession, EngineError> {
        let session_id = CountSessionId::new(AggregateId::new());
        let committed = self.dispatcher.run("start_count", |uow| {
            let products = load_aggregates::<ProductStock, _>(self.store())?;
            let snapshot = snapshot_lines(products.values(), request.scope, request.category.as_deref());

            let mut session: CountSession = uow.load(session_id.0)?;
            uow.execute(
                &mut session,
                &CountCommand::Start(StartCount {
                    session_id,
                    scope: request.scope,
                    category: request.category.clone(),
                    blind: request.blind,
                    snapshot,
                    started_at: actor.at,
                    started_by: actor.id,
                }),
            )?;
            Ok(session)
        })?;
        info!(
            session_id = %session_id,
            scope = ?request.scope,
            products = committed.value.snapshot().count(),
            "count session started"
        );
        Ok(committed.value)
    }

    /// Record a counted quantity; the last submission wins.
    pub fn submit_count(
        &self,
        session_id: CountSessionId,
        product_id: ProductId,
        counted: i64,
        actor: Actor,
    ) -> Result<CountSession, EngineError> {
        let committed = self.dispatcher.run("submit_count", |uow| {
            let mut session: CountSession = uow.load(session_id.0)?;
            uow.execute(
                &mut session,
                &CountCommand::Submit(SubmitCount {
                    product_id,
                    counted,
                    counted_at: actor.at,
                    counted_by: actor.id,
                }),
            )?;
            Ok(session)
        })?;
        Ok(committed.value)
    }

    /// Close the session: compare counts with the stock read in this same
    /// transaction, apply the variances of untouched products, post their
    /// valuation and record the report.
    pub fn close_count(&self, session_id: CountSessionId, actor: Actor) -> Result<CountClosed, EngineError> {
        let committed = self.dispatcher.run("close_count", |uow| {
            let mut session: CountSession = uow.load(session_id.0)?;

            let mut products: BTreeMap<ProductId, ProductStock> = BTreeMap::new();
            for product_id in session.counts().keys() {
                products.insert(*product_id, uow.load(product_id.0)?);
            }

            let plan = plan_reconciliation(&session, &products)
                .map_err(|e| EngineError::from_domain(e, || format!("count session {session_id}")))?;

            for adjustment in &plan.adjustments {
                let product = products.get_mut(&adjustment.product_id).ok_or_else(|| {
                    EngineError::invariant(format!(
                        "adjustment planned for unloaded product {}",
                        adjustment.product_id
                    ))
                })?;
                uow.execute(
                    product,
                    &StockCommand::Adjust(AdjustStock {
                        delta: adjustment.delta,
                        location: adjustment.location,
                        meta: MovementMeta::new(actor.at, actor.id)
                            .with_note(format!("Physical inventory {session_id}"))
                            .with_reference(session_id.to_string()),
                    }),
                )?;
            }

            let ctx = PostingContext::new(actor.at, actor.id)
                .with_reference(Reference::new(ReferenceType::PhysicalInventory, session_id.to_string()));
            self.post(
                uow,
                inventory_variance_entries(
                    self.accounts(),
                    &ctx,
                    plan.report.shortage_value,
                    plan.report.surplus_value,
                ),
            )?;

            uow.execute(
                &mut session,
                &CountCommand::Close(CloseCount {
                    report: plan.report.clone(),
                    closed_at: actor.at,
                    closed_by: actor.id,
                }),
            )?;
            Ok((session, plan.report))
        })?;

        let (session, report) = committed.value;
        info!(
            session_id = %session_id,
            applied = report.applied.len(),
            flagged = report.flagged.len(),
            uncounted = report.uncounted.len(),
            value_impact = %report.value_impact,
            "count session closed"
        );
        Ok(CountClosed {
            session,
            report,
            entries: committed_entries(&committed.events)?,
        })
    }

    /// Abandon an open session. Stock is not touched.
    pub fn cancel_count(&self, session_id: CountSessionId, reason: &str, actor: Actor) -> Result<CountSession, EngineError> {
        let committed = self.dispatcher.run("cancel_count", |uow| {
            let mut session: CountSession = uow.load(session_id.0)?;
            uow.execute(
                &mut session,
                &CountCommand::Cancel(CancelCount {
                    reason: reason.to_string(),
                    cancelled_at: actor.at,
                    cancelled_by: actor.id,
                }),
            )?;
            Ok(session)
        })?;
        Ok(committed.value)
    }

    pub fn count_session(&self, session_id: CountSessionId) -> Result<CountSession, EngineError> {
        let session: CountSession = self.load_one(session_id.0)?;
        if session.status().is_none() {
            return Err(EngineError::not_found(format!("count session {session_id}")));
        }
        Ok(session)
    }

    /// The sheet handed to counters; system quantities hidden when blind.
    pub fn count_sheet(&self, session_id: CountSessionId) -> Result<Vec<CountSheetLine>, EngineError> {
        Ok(self.count_session(session_id)?.count_sheet())
    }
}
