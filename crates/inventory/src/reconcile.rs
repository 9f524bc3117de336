//! Close-time reconciliation of a count session against live stock.
//!
//! Planning is pure: it compares the session snapshot, the submitted counts
//! and the products' state at close, and says which ADJUST movements to
//! record and which products need a human to look at them. The caller
//! commits the adjustments, the valuation entries and the session close in
//! one unit of work.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shopkeep_core::{DomainError, Money};

use crate::count_session::{CountScope, CountSession, SessionStatus};
use crate::product::{Location, ProductId, ProductStock, StockLevels};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAdjustment {
    pub product_id: ProductId,
    pub location: Location,
    pub delta: i64,
}

/// A counted product whose variance is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedVariance {
    pub product_id: ProductId,
    pub name: String,
    pub system_qty: i64,
    pub counted: i64,
    /// `counted - system_qty`.
    pub variance: i64,
    pub unit_cost: Money,
    /// `|variance| * unit_cost`.
    pub value: Money,
}

/// A counted product whose stock moved during the count. Not adjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedProduct {
    pub product_id: ProductId,
    pub name: String,
    pub snapshot_qty: i64,
    pub current_qty: i64,
    pub counted: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub applied: Vec<AppliedVariance>,
    pub flagged: Vec<FlaggedProduct>,
    pub uncounted: Vec<ProductId>,
    /// Counted products with no variance.
    pub matched: usize,
    pub shortage_units: i64,
    pub surplus_units: i64,
    pub shortage_value: Money,
    pub surplus_value: Money,
    /// `surplus_value - shortage_value`.
    pub value_impact: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub adjustments: Vec<PlannedAdjustment>,
    pub report: ReconciliationReport,
}

/// Distribute a whole-store count over both locations in the current
/// warehouse/shop proportion, rounding half up with the remainder on the
/// shop. An empty product puts everything in the warehouse.
pub fn split_between_locations(counted: i64, current: StockLevels) -> StockLevels {
    let total = i128::from(current.total());
    if total <= 0 {
        return StockLevels {
            warehouse: counted,
            shop: 0,
        };
    }
    let numerator = 2 * i128::from(counted) * i128::from(current.warehouse) + total;
    let warehouse = (numerator / (2 * total)) as i64;
    StockLevels {
        warehouse,
        shop: counted - warehouse,
    }
}

fn location_deltas(
    scope: CountScope,
    product: &ProductStock,
    counted: i64,
    variance: i64,
) -> Vec<(Location, i64)> {
    match scope {
        CountScope::Warehouse => vec![(Location::Warehouse, variance)],
        CountScope::Shop => vec![(Location::Shop, variance)],
        CountScope::Both => {
            let current = product.levels();
            let target = split_between_locations(counted, current);
            [
                (Location::Warehouse, target.warehouse - current.warehouse),
                (Location::Shop, target.shop - current.shop),
            ]
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .collect()
        }
    }
}

/// Plan the close of an open session against `current` product state.
///
/// Per counted product: unchanged since the snapshot means its variance is
/// applied; changed means it is flagged with both quantities and left alone.
/// Uncounted products are listed and untouched.
pub fn plan_reconciliation(
    session: &CountSession,
    current: &BTreeMap<ProductId, ProductStock>,
) -> Result<ReconciliationPlan, DomainError> {
    match session.status() {
        Some(SessionStatus::Open) => {}
        None => return Err(DomainError::NotFound),
        Some(status) => {
            return Err(DomainError::invalid_state(format!(
                "count session {} is {status:?}",
                session.id_typed()
            )));
        }
    }

    let scope = session.scope();
    let mut adjustments = Vec::new();
    let mut report = ReconciliationReport::default();

    for line in session.snapshot() {
        let Some(&counted) = session.counts().get(&line.product_id) else {
            report.uncounted.push(line.product_id);
            continue;
        };
        let product = current.get(&line.product_id).ok_or_else(|| {
            DomainError::invariant(format!(
                "product {} in count snapshot has no stock stream",
                line.product_id
            ))
        })?;

        let current_qty = scope.system_qty(product);
        if current_qty != line.system_qty {
            report.flagged.push(FlaggedProduct {
                product_id: line.product_id,
                name: line.name.clone(),
                snapshot_qty: line.system_qty,
                current_qty,
                counted,
            });
            continue;
        }

        let variance = counted - current_qty;
        if variance == 0 {
            report.matched += 1;
            continue;
        }

        adjustments.extend(
            location_deltas(scope, product, counted, variance)
                .into_iter()
                .map(|(location, delta)| PlannedAdjustment {
                    product_id: line.product_id,
                    location,
                    delta,
                }),
        );

        let overflow = || {
            DomainError::validation(format!(
                "variance of {variance} on {} is too large to value",
                line.name
            ))
        };
        let within_cap = |v: &Money| *v <= Money::MAX;
        let value = product
            .unit_cost()
            .checked_times(variance.abs())
            .filter(within_cap)
            .ok_or_else(overflow)?;
        let total = if variance < 0 {
            report.shortage_units += -variance;
            &mut report.shortage_value
        } else {
            report.surplus_units += variance;
            &mut report.surplus_value
        };
        *total = total.checked_add(value).filter(within_cap).ok_or_else(overflow)?;
        report.applied.push(AppliedVariance {
            product_id: line.product_id,
            name: line.name.clone(),
            system_qty: current_qty,
            counted,
            variance,
            unit_cost: product.unit_cost(),
            value,
        });
    }

    report.value_impact = report.surplus_value - report.shortage_value;
    Ok(ReconciliationPlan {
        adjustments,
        report,
    })
}
