//! Compound "record transaction" operations.
//!
//! Each one stages its journal entries, stock movements and debt in a single
//! unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use shopkeep_accounting::postings::{
    expense_entry, income_entry, purchase_entries, sale_entries, sales_return_entries,
};
use shopkeep_accounting::{
    ExpenseCategory, PaymentChannel, PostedEntry, PostingContext, Reference, ReferenceType,
    RefundChannel,
};
use shopkeep_core::Money;
use shopkeep_debts::{Debt, DebtorKind};
use shopkeep_events::{EventBus, EventEnvelope};
use shopkeep_inventory::{
    IssueStock, Location, MovementMeta, ProductId, ProductStock, ReceiveStock, StockCommand,
};

use super::debts::{ExistingDebt, OpenDebtRequest};
use super::{committed_entries, Actor, BackOffice};
use crate::dispatcher::UnitOfWork;
use crate::error::EngineError;
use crate::event_store::EventStore;

/// One product line of a sale, purchase or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    pub invoice: String,
    pub total: Money,
    /// Cost of the goods sold; no COGS entry when zero.
    pub cost: Money,
    pub payment: PaymentChannel,
    pub lines: Vec<StockLine>,
    /// Required for credit sales.
    pub customer_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub purchase_order: String,
    pub total: Money,
    pub payment: PaymentChannel,
    pub lines: Vec<StockLine>,
    /// Required for purchases on credit.
    pub supplier_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReturnRequest {
    pub return_ref: String,
    pub refund: Money,
    /// Cost of the goods coming back into stock.
    pub cost: Money,
    pub channel: RefundChannel,
    pub lines: Vec<StockLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRequest {
    pub amount: Money,
    pub category: ExpenseCategory,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeRequest {
    pub amount: Money,
    pub description: String,
}

/// Everything a compound operation committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub entries: Vec<PostedEntry>,
    /// Products touched, in line order.
    pub products: Vec<ProductStock>,
    pub debt: Option<Debt>,
}

struct Staged {
    products: Vec<ProductStock>,
    debt: Option<Debt>,
}

/// Party and due date of a credit transaction.
fn credit_terms(
    channel: PaymentChannel,
    party: &Option<String>,
    due_date: Option<DateTime<Utc>>,
    what: &str,
) -> Result<Option<(String, DateTime<Utc>)>, EngineError> {
    if channel != PaymentChannel::Credit {
        return Ok(None);
    }
    match (party, due_date) {
        (Some(party), Some(due)) => Ok(Some((party.clone(), due))),
        _ => Err(EngineError::validation(format!(
            "a {what} on credit needs a counterparty and a due date"
        ))),
    }
}

impl<S, B> BackOffice<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Sale: revenue and COGS entries, one OUT movement per line and, on
    /// credit, a customer debt for the invoice.
    pub fn record_sale(&self, request: SaleRequest, actor: Actor) -> Result<TransactionReceipt, EngineError> {
        let terms = credit_terms(request.payment, &request.customer_id, request.due_date, "sale")?;
        let reference = Reference::new(ReferenceType::Invoice, request.invoice.as_str());

        let receipt = self.run_transaction("record_sale", |uow| {
            let products = stage_lines(uow, &request.lines, &reference, actor, |line, meta| {
                StockCommand::Issue(IssueStock {
                    quantity: line.quantity,
                    location: line.location,
                    meta,
                })
            })?;

            let ctx = PostingContext::new(actor.at, actor.id).with_reference(reference.clone());
            self.post(
                uow,
                sale_entries(self.accounts(), &ctx, request.total, request.cost, request.payment),
            )?;

            let debt = match &terms {
                Some((customer, due)) => Some(self.stage_open_debt(
                    uow,
                    &OpenDebtRequest {
                        debtor_kind: DebtorKind::Customer,
                        debtor_id: customer.clone(),
                        reference: reference.clone(),
                        description: Some(format!("Invoice {}", request.invoice)),
                        amount: request.total,
                        due_date: *due,
                    },
                    actor,
                    ExistingDebt::Reject,
                )?),
                None => None,
            };
            Ok(Staged { products, debt })
        })?;
        info!(invoice = %request.invoice, total = %request.total, payment = ?request.payment, "sale recorded");
        Ok(receipt)
    }

    /// Goods received: inventory entry, one IN movement per line and, on
    /// credit, a supplier debt for the purchase order.
    pub fn receive_purchase(&self, request: PurchaseRequest, actor: Actor) -> Result<TransactionReceipt, EngineError> {
        let terms = credit_terms(request.payment, &request.supplier_id, request.due_date, "purchase")?;
        let reference = Reference::new(ReferenceType::PurchaseOrder, request.purchase_order.as_str());

        let receipt = self.run_transaction("receive_purchase", |uow| {
            let products = stage_lines(uow, &request.lines, &reference, actor, |line, meta| {
                StockCommand::Receive(ReceiveStock {
                    quantity: line.quantity,
                    location: line.location,
                    meta,
                })
            })?;

            let ctx = PostingContext::new(actor.at, actor.id).with_reference(reference.clone());
            self.post(
                uow,
                purchase_entries(self.accounts(), &ctx, request.total, request.payment),
            )?;

            let debt = match &terms {
                Some((supplier, due)) => Some(self.stage_open_debt(
                    uow,
                    &OpenDebtRequest {
                        debtor_kind: DebtorKind::Supplier,
                        debtor_id: supplier.clone(),
                        reference: reference.clone(),
                        description: Some(format!("Purchase order {}", request.purchase_order)),
                        amount: request.total,
                        due_date: *due,
                    },
                    actor,
                    ExistingDebt::Reject,
                )?),
                None => None,
            };
            Ok(Staged { products, debt })
        })?;
        info!(purchase_order = %request.purchase_order, total = %request.total, "purchase received");
        Ok(receipt)
    }

    /// Customer return: returns and cost-reversal entries plus IN movements.
    pub fn record_sales_return(
        &self,
        request: SalesReturnRequest,
        actor: Actor,
    ) -> Result<TransactionReceipt, EngineError> {
        if !request.refund.is_positive() && !request.cost.is_positive() && request.lines.is_empty() {
            return Err(EngineError::validation("a sales return must refund, restock or both"));
        }
        let reference = Reference::new(ReferenceType::SalesReturn, request.return_ref.as_str());

        self.run_transaction("record_sales_return", |uow| {
            let products = stage_lines(uow, &request.lines, &reference, actor, |line, meta| {
                StockCommand::Receive(ReceiveStock {
                    quantity: line.quantity,
                    location: line.location,
                    meta,
                })
            })?;
            let ctx = PostingContext::new(actor.at, actor.id).with_reference(reference.clone());
            self.post(
                uow,
                sales_return_entries(self.accounts(), &ctx, request.refund, request.cost, request.channel),
            )?;
            Ok(Staged { products, debt: None })
        })
    }

    pub fn record_expense(&self, request: ExpenseRequest, actor: Actor) -> Result<PostedEntry, EngineError> {
        let ctx = PostingContext::new(actor.at, actor.id);
        self.record_entry(expense_entry(
            self.accounts(),
            &ctx,
            request.amount,
            request.category,
            &request.description,
        ))
    }

    pub fn record_income(&self, request: IncomeRequest, actor: Actor) -> Result<PostedEntry, EngineError> {
        let ctx = PostingContext::new(actor.at, actor.id);
        self.record_entry(income_entry(self.accounts(), &ctx, request.amount, &request.description))
    }

    fn run_transaction<F>(&self, operation: &str, body: F) -> Result<TransactionReceipt, EngineError>
    where
        F: FnMut(&mut UnitOfWork<'_, S>) -> Result<Staged, EngineError>,
    {
        let committed = self.dispatcher.run(operation, body)?;
        Ok(TransactionReceipt {
            entries: committed_entries(&committed.events)?,
            products: committed.value.products,
            debt: committed.value.debt,
        })
    }
}

/// Load each line's product and stage its movement. A product appearing on
/// several lines is reloaded, so later lines see earlier movements.
fn stage_lines<S, F>(
    uow: &mut UnitOfWork<'_, S>,
    lines: &[StockLine],
    reference: &Reference,
    actor: Actor,
    command: F,
) -> Result<Vec<ProductStock>, EngineError>
where
    S: EventStore,
    F: Fn(&StockLine, MovementMeta) -> StockCommand,
{
    let mut products = Vec::with_capacity(lines.len());
    for line in lines {
        let mut product: ProductStock = uow.load(line.product_id.0)?;
        let meta = MovementMeta::new(actor.at, actor.id).with_reference(reference.id.as_str());
        uow.execute(&mut product, &command(line, meta))?;
        products.push(product);
    }
    Ok(products)
}
