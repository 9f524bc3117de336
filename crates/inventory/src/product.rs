use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopkeep_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, Money};
use shopkeep_events::Event;

pub const PRODUCT_AGGREGATE_TYPE: &str = "inventory.product";

/// Most units a single location may hold, and the largest quantity one
/// command may move.
pub const MAX_STOCK_QUANTITY: i64 = 1_000_000_000;

/// Product identifier (one stock stream per product).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Physical stock location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Warehouse,
    Shop,
}

impl Location {
    pub fn other(self) -> Self {
        match self {
            Location::Warehouse => Location::Shop,
            Location::Shop => Location::Warehouse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    In,
    Out,
    TransferToShop,
    TransferToWarehouse,
    Adjust,
}

/// Immutable record explaining exactly one change of a product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    /// Magnitude of the change, always > 0.
    pub quantity: i64,
    /// Location the quantity left or entered. For transfers, the source.
    pub location: Location,
    /// For adjustments: the delta as requested, before clamping at zero.
    pub requested_delta: Option<i64>,
    pub date: DateTime<Utc>,
    pub note: Option<String>,
    pub reference: Option<String>,
    pub created_by: ActorId,
}

impl StockMovement {
    /// Signed change this movement applies to `location`.
    pub fn delta_at(&self, location: Location) -> i64 {
        let q = self.quantity;
        match self.movement_type {
            MovementType::In if self.location == location => q,
            MovementType::Out if self.location == location => -q,
            MovementType::TransferToShop | MovementType::TransferToWarehouse => {
                if self.location == location {
                    -q
                } else {
                    q
                }
            }
            MovementType::Adjust if self.location == location => {
                if self.requested_delta.is_some_and(|d| d < 0) {
                    -q
                } else {
                    q
                }
            }
            _ => 0,
        }
    }

    /// Signed change to the product's total stock. Transfers only move
    /// units between locations.
    pub fn stock_delta(&self) -> i64 {
        let q = self.quantity;
        match self.movement_type {
            MovementType::In => q,
            MovementType::Out => -q,
            MovementType::TransferToShop | MovementType::TransferToWarehouse => 0,
            MovementType::Adjust if self.requested_delta.is_some_and(|d| d < 0) => -q,
            MovementType::Adjust => q,
        }
    }
}

/// Per-location quantities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    pub warehouse: i64,
    pub shop: i64,
}

impl StockLevels {
    pub fn at(&self, location: Location) -> i64 {
        match location {
            Location::Warehouse => self.warehouse,
            Location::Shop => self.shop,
        }
    }

    pub fn total(&self) -> i64 {
        self.warehouse + self.shop
    }
}

/// Aggregate root: ProductStock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    id: ProductId,
    name: String,
    category: Option<String>,
    unit_cost: Money,
    min_level: i64,
    levels: StockLevels,
    stock_qty: i64,
    version: u64,
    created: bool,
}

impl ProductStock {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            name: String::new(),
            category: None,
            unit_cost: Money::ZERO,
            min_level: 0,
            levels: StockLevels::default(),
            stock_qty: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn unit_cost(&self) -> Money {
        self.unit_cost
    }

    pub fn min_level(&self) -> i64 {
        self.min_level
    }

    pub fn warehouse_qty(&self) -> i64 {
        self.levels.warehouse
    }

    pub fn shop_qty(&self) -> i64 {
        self.levels.shop
    }

    pub fn stock_qty(&self) -> i64 {
        self.stock_qty
    }

    pub fn levels(&self) -> StockLevels {
        self.levels
    }

    pub fn quantity_at(&self, location: Location) -> i64 {
        self.levels.at(location)
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock_qty <= self.min_level
    }
}

impl AggregateRoot for ProductStock {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Bookkeeping fields shared by every stock command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementMeta {
    pub movement_id: Uuid,
    pub date: DateTime<Utc>,
    pub note: Option<String>,
    pub reference: Option<String>,
    pub created_by: ActorId,
}

impl MovementMeta {
    pub fn new(date: DateTime<Utc>, created_by: ActorId) -> Self {
        Self {
            movement_id: Uuid::now_v7(),
            date,
            note: None,
            reference: None,
            created_by,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Command: RegisterProduct. Opening quantities become IN movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProduct {
    pub product_id: ProductId,
    pub name: String,
    pub category: Option<String>,
    pub unit_cost: Money,
    pub min_level: i64,
    pub opening: StockLevels,
    pub date: DateTime<Utc>,
    pub created_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub quantity: i64,
    pub location: Location,
    pub meta: MovementMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStock {
    pub quantity: i64,
    pub location: Location,
    pub meta: MovementMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub quantity: i64,
    pub from: Location,
    pub to: Location,
    pub meta: MovementMeta,
}

/// Command: AdjustStock. The resulting quantity is clamped at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub delta: i64,
    pub location: Location,
    pub meta: MovementMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    Register(RegisterProduct),
    Receive(ReceiveStock),
    Issue(IssueStock),
    Transfer(TransferStock),
    Adjust(AdjustStock),
}

/// Event: ProductRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRegistered {
    pub product_id: ProductId,
    pub name: String,
    pub category: Option<String>,
    pub unit_cost: Money,
    pub min_level: i64,
    pub date: DateTime<Utc>,
    pub created_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    ProductRegistered(ProductRegistered),
    MovementRecorded(StockMovement),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::ProductRegistered(_) => "inventory.product.registered",
            StockEvent::MovementRecorded(_) => "inventory.product.movement_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::ProductRegistered(e) => e.date,
            StockEvent::MovementRecorded(m) => m.date,
        }
    }
}

impl Aggregate for ProductStock {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::ProductRegistered(e) => {
                self.id = e.product_id;
                self.name = e.name.clone();
                self.category = e.category.clone();
                self.unit_cost = e.unit_cost;
                self.min_level = e.min_level;
                self.created = true;
            }
            StockEvent::MovementRecorded(m) => {
                self.levels.warehouse += m.delta_at(Location::Warehouse);
                self.levels.shop += m.delta_at(Location::Shop);
                self.stock_qty += m.stock_delta();
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::Register(cmd) => self.handle_register(cmd),
            StockCommand::Receive(cmd) => self.handle_receive(cmd),
            StockCommand::Issue(cmd) => self.handle_issue(cmd),
            StockCommand::Transfer(cmd) => self.handle_transfer(cmd),
            StockCommand::Adjust(cmd) => self.handle_adjust(cmd),
        }
    }

    fn check_invariants(&self) -> Result<(), Self::Error> {
        if self.stock_qty != self.levels.total() {
            return Err(DomainError::invariant(format!(
                "product {}: stock {} != warehouse {} + shop {}",
                self.id, self.stock_qty, self.levels.warehouse, self.levels.shop
            )));
        }
        if self.levels.warehouse < 0 || self.levels.shop < 0 {
            return Err(DomainError::invariant(format!(
                "product {}: negative stock (warehouse {}, shop {})",
                self.id, self.levels.warehouse, self.levels.shop
            )));
        }
        Ok(())
    }
}

fn ensure_positive_quantity(quantity: i64) -> Result<(), DomainError> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    if quantity > MAX_STOCK_QUANTITY {
        return Err(DomainError::validation(format!(
            "quantity {quantity} exceeds the limit of {MAX_STOCK_QUANTITY}"
        )));
    }
    Ok(())
}

fn ensure_within_capacity(current: i64, added: i64, location: Location) -> Result<(), DomainError> {
    if current + added > MAX_STOCK_QUANTITY {
        return Err(DomainError::validation(format!(
            "{location:?} stock would exceed the limit of {MAX_STOCK_QUANTITY}"
        )));
    }
    Ok(())
}

impl ProductStock {
    fn ensure_registered(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    fn movement(
        &self,
        movement_type: MovementType,
        quantity: i64,
        location: Location,
        requested_delta: Option<i64>,
        meta: &MovementMeta,
    ) -> StockEvent {
        StockEvent::MovementRecorded(StockMovement {
            id: meta.movement_id,
            product_id: self.id,
            movement_type,
            quantity,
            location,
            requested_delta,
            date: meta.date,
            note: meta.note.clone(),
            reference: meta.reference.clone(),
            created_by: meta.created_by,
        })
    }

    fn handle_register(&self, cmd: &RegisterProduct) -> Result<Vec<StockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already registered"));
        }
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if cmd.unit_cost.is_negative() || cmd.unit_cost > Money::MAX {
            return Err(DomainError::InvalidAmount(cmd.unit_cost));
        }
        if cmd.min_level < 0 || cmd.min_level > MAX_STOCK_QUANTITY {
            return Err(DomainError::validation(format!(
                "minimum level must be between 0 and {MAX_STOCK_QUANTITY}"
            )));
        }
        if cmd.opening.warehouse < 0 || cmd.opening.shop < 0 {
            return Err(DomainError::validation("opening quantities cannot be negative"));
        }
        if cmd.opening.warehouse > MAX_STOCK_QUANTITY || cmd.opening.shop > MAX_STOCK_QUANTITY {
            return Err(DomainError::validation(format!(
                "opening quantities cannot exceed {MAX_STOCK_QUANTITY}"
            )));
        }

        let mut events = vec![StockEvent::ProductRegistered(ProductRegistered {
            product_id: cmd.product_id,
            name: name.to_string(),
            category: cmd
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            unit_cost: cmd.unit_cost,
            min_level: cmd.min_level,
            date: cmd.date,
            created_by: cmd.created_by,
        })];

        for location in [Location::Warehouse, Location::Shop] {
            let quantity = cmd.opening.at(location);
            if quantity > 0 {
                events.push(StockEvent::MovementRecorded(StockMovement {
                    id: Uuid::now_v7(),
                    product_id: cmd.product_id,
                    movement_type: MovementType::In,
                    quantity,
                    location,
                    requested_delta: None,
                    date: cmd.date,
                    note: Some("opening stock".to_string()),
                    reference: None,
                    created_by: cmd.created_by,
                }));
            }
        }
        Ok(events)
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        ensure_positive_quantity(cmd.quantity)?;
        ensure_within_capacity(self.quantity_at(cmd.location), cmd.quantity, cmd.location)?;
        Ok(vec![self.movement(MovementType::In, cmd.quantity, cmd.location, None, &cmd.meta)])
    }

    fn handle_issue(&self, cmd: &IssueStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        ensure_positive_quantity(cmd.quantity)?;
        let available = self.quantity_at(cmd.location);
        if available < cmd.quantity {
            return Err(DomainError::InsufficientStock {
                requested: cmd.quantity,
                available,
            });
        }
        Ok(vec![self.movement(MovementType::Out, cmd.quantity, cmd.location, None, &cmd.meta)])
    }

    fn handle_transfer(&self, cmd: &TransferStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        ensure_positive_quantity(cmd.quantity)?;
        if cmd.from == cmd.to {
            return Err(DomainError::validation("transfer source and destination are the same"));
        }
        let available = self.quantity_at(cmd.from);
        if available < cmd.quantity {
            return Err(DomainError::InsufficientStock {
                requested: cmd.quantity,
                available,
            });
        }
        ensure_within_capacity(self.quantity_at(cmd.to), cmd.quantity, cmd.to)?;
        let movement_type = match cmd.to {
            Location::Shop => MovementType::TransferToShop,
            Location::Warehouse => MovementType::TransferToWarehouse,
        };
        Ok(vec![self.movement(movement_type, cmd.quantity, cmd.from, None, &cmd.meta)])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        if cmd.delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }
        if cmd.delta.unsigned_abs() > MAX_STOCK_QUANTITY.unsigned_abs() {
            return Err(DomainError::validation(format!(
                "adjustment of {} exceeds the limit of {MAX_STOCK_QUANTITY}",
                cmd.delta
            )));
        }
        let current = self.quantity_at(cmd.location);
        if cmd.delta > 0 {
            ensure_within_capacity(current, cmd.delta, cmd.location)?;
        }
        let target = (current + cmd.delta).max(0);
        let applied = target - current;
        if applied == 0 {
            // Already at zero and asked to go lower: nothing to record.
            return Ok(vec![]);
        }
        Ok(vec![self.movement(
            MovementType::Adjust,
            applied.abs(),
            cmd.location,
            Some(cmd.delta),
            &cmd.meta,
        )])
    }
}

/// Products at or below their minimum level.
pub fn low_stock<'a>(products: impl IntoIterator<Item = &'a ProductStock>) -> Vec<&'a ProductStock> {
    products
        .into_iter()
        .filter(|p| p.is_registered() && p.is_low_stock())
        .collect()
}
