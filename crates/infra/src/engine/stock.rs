use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use shopkeep_core::{AggregateId, Money};
use shopkeep_events::{EventBus, EventEnvelope};
use shopkeep_inventory::{
    low_stock, AdjustStock, IssueStock, Location, MovementMeta, ProductId, ProductStock,
    ReceiveStock, RegisterProduct, StockCommand, StockLevels, TransferStock,
};

use super::{Actor, BackOffice};
use crate::error::EngineError;
use crate::event_store::EventStore;
use crate::projections::{load_aggregates, MovementRecord, ReadModel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProductRequest {
    pub name: String,
    pub category: Option<String>,
    pub unit_cost: Money,
    pub min_level: i64,
    /// Recorded as IN movements at each location.
    pub opening: StockLevels,
}

impl<S, B> BackOffice<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn register_product(&self, request: RegisterProductRequest, actor: Actor) -> Result<ProductStock, EngineError> {
        let product_id = ProductId::new(AggregateId::new());
        let product = self.run_stock(
            "register_product",
            product_id,
            StockCommand::Register(RegisterProduct {
                product_id,
                name: request.name,
                category: request.category,
                unit_cost: request.unit_cost,
                min_level: request.min_level,
                opening: request.opening,
                date: actor.at,
                created_by: actor.id,
            }),
        )?;
        info!(product_id = %product_id, name = product.name(), "product registered");
        Ok(product)
    }

    pub fn receive_stock(
        &self,
        product_id: ProductId,
        quantity: i64,
        location: Location,
        actor: Actor,
    ) -> Result<ProductStock, EngineError> {
        self.run_stock(
            "receive_stock",
            product_id,
            StockCommand::Receive(ReceiveStock {
                quantity,
                location,
                meta: MovementMeta::new(actor.at, actor.id),
            }),
        )
    }

    pub fn issue_stock(
        &self,
        product_id: ProductId,
        quantity: i64,
        location: Location,
        actor: Actor,
    ) -> Result<ProductStock, EngineError> {
        self.run_stock(
            "issue_stock",
            product_id,
            StockCommand::Issue(IssueStock {
                quantity,
                location,
                meta: MovementMeta::new(actor.at, actor.id),
            }),
        )
    }

    pub fn transfer_stock(
        &self,
        product_id: ProductId,
        quantity: i64,
        from: Location,
        to: Location,
        actor: Actor,
    ) -> Result<ProductStock, EngineError> {
        self.run_stock(
            "transfer_stock",
            product_id,
            StockCommand::Transfer(TransferStock {
                quantity,
                from,
                to,
                meta: MovementMeta::new(actor.at, actor.id),
            }),
        )
    }

    /// Signed correction at one location; the result is floored at zero and
    /// the requested delta is kept on the movement.
    pub fn adjust_stock(
        &self,
        product_id: ProductId,
        delta: i64,
        location: Location,
        note: &str,
        actor: Actor,
    ) -> Result<ProductStock, EngineError> {
        self.run_stock(
            "adjust_stock",
            product_id,
            StockCommand::Adjust(AdjustStock {
                delta,
                location,
                meta: MovementMeta::new(actor.at, actor.id).with_note(note),
            }),
        )
    }

    pub fn product(&self, product_id: ProductId) -> Result<ProductStock, EngineError> {
        let product: ProductStock = self.load_one(product_id.0)?;
        if !product.is_registered() {
            return Err(EngineError::not_found(format!("product {product_id}")));
        }
        Ok(product)
    }

    pub fn products(&self) -> Result<Vec<ProductStock>, EngineError> {
        Ok(load_aggregates::<ProductStock, _>(self.store())?
            .into_values()
            .filter(ProductStock::is_registered)
            .collect())
    }

    pub fn low_stock_products(&self) -> Result<Vec<ProductStock>, EngineError> {
        let products = self.products()?;
        Ok(low_stock(&products).into_iter().cloned().collect())
    }

    /// Movement history, newest first; one product or all of them.
    pub fn movements(&self, product_id: Option<ProductId>) -> Result<Vec<MovementRecord>, EngineError> {
        let model = ReadModel::load(self.store())?;
        Ok(model.movement_history(product_id).into_iter().cloned().collect())
    }

    fn run_stock(&self, operation: &str, product_id: ProductId, command: StockCommand) -> Result<ProductStock, EngineError> {
        let committed = self.dispatcher.run(operation, |uow| {
            let mut product: ProductStock = uow.load(product_id.0)?;
            uow.execute(&mut product, &command)?;
            Ok(product)
        })?;
        Ok(committed.value)
    }
}
