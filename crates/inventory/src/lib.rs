//! Inventory domain module (event-sourced).
//!
//! Business rules for multi-location stock and physical counts, implemented
//! as deterministic domain logic (no IO, no storage).
//!
//! - [`product`]: per-product stock split by warehouse/shop, plus the
//!   movement log that explains every change.
//! - [`count_session`]: physical inventory sessions (snapshot, counts, close).
//! - [`reconcile`]: close-time comparison of counts against live stock.

pub mod count_session;
pub mod product;
pub mod reconcile;

pub use count_session::{
    snapshot_lines, CancelCount, CloseCount, CountCommand, CountEvent, CountScope, CountSession,
    CountSessionId, CountSheetLine, SessionStatus, SnapshotLine, StartCount, SubmitCount,
    COUNT_SESSION_AGGREGATE_TYPE,
};
pub use product::{
    low_stock, AdjustStock, IssueStock, Location, MovementMeta, MovementType, ProductId,
    ProductRegistered, ProductStock, ReceiveStock, RegisterProduct, StockCommand, StockEvent,
    StockLevels, StockMovement, TransferStock, PRODUCT_AGGREGATE_TYPE,
};
pub use reconcile::{
    plan_reconciliation, split_between_locations, AppliedVariance, FlaggedProduct,
    PlannedAdjustment, ReconciliationPlan, ReconciliationReport,
};
