//! Alert scan over the read models.
//!
//! Pure: thresholds come from [`AlertSettings`], the clock from the caller.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use shopkeep_core::Money;
use shopkeep_debts::{Debt, DebtorKind};
use shopkeep_inventory::ProductStock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub low_stock_enabled: bool,
    /// Open debts due within this many days raise a "due soon" alert.
    pub due_soon_days: i64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            low_stock_enabled: true,
            due_soon_days: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowStock,
    OutOfStock,
    PaymentDueSoon,
    PaymentOverdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// What the operator is expected to do about an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Reorder,
    CollectDebt,
    PaySupplier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    /// Product or debt the alert is about.
    pub subject: String,
    pub message: String,
    pub action: SuggestedAction,
    pub due_date: Option<DateTime<Utc>>,
    pub amount: Option<Money>,
}

fn stock_alert(product: &ProductStock) -> Option<Alert> {
    if !product.is_registered() || !product.is_low_stock() {
        return None;
    }
    let (kind, severity, message) = if product.stock_qty() <= 0 {
        (
            AlertKind::OutOfStock,
            AlertSeverity::Critical,
            format!("{} is out of stock", product.name()),
        )
    } else {
        (
            AlertKind::LowStock,
            AlertSeverity::Warning,
            format!(
                "{} is low: {} left (minimum {})",
                product.name(),
                product.stock_qty(),
                product.min_level()
            ),
        )
    };
    Some(Alert {
        kind,
        severity,
        subject: product.id_typed().to_string(),
        message,
        action: SuggestedAction::Reorder,
        due_date: None,
        amount: None,
    })
}

fn debt_alert(debt: &Debt, settings: &AlertSettings, now: DateTime<Utc>) -> Option<Alert> {
    if !debt.is_opened() || !debt.status().is_open() {
        return None;
    }
    let due = debt.due_date()?;
    let debtor = debt.debtor_id()?;
    let remaining = debt.remaining_amount();

    let (action, who) = match debt.debtor_kind() {
        DebtorKind::Customer => (SuggestedAction::CollectDebt, format!("customer {debtor}")),
        DebtorKind::Supplier => (SuggestedAction::PaySupplier, format!("supplier {debtor}")),
    };

    let (kind, severity, message) = if debt.is_overdue(now) {
        (
            AlertKind::PaymentOverdue,
            AlertSeverity::Critical,
            format!("{remaining} from {who} is overdue since {}", due.date_naive()),
        )
    } else if due <= now + Duration::days(settings.due_soon_days) {
        (
            AlertKind::PaymentDueSoon,
            AlertSeverity::Warning,
            format!("{remaining} with {who} is due on {}", due.date_naive()),
        )
    } else {
        return None;
    };

    Some(Alert {
        kind,
        severity,
        subject: debt.id_typed().to_string(),
        message,
        action,
        due_date: Some(due),
        amount: Some(remaining),
    })
}

/// Alerts for the given products and debts, critical first.
pub fn scan_alerts<'p, 'd>(
    products: impl IntoIterator<Item = &'p ProductStock>,
    debts: impl IntoIterator<Item = &'d Debt>,
    settings: &AlertSettings,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts: Vec<Alert> = Vec::new();
    if settings.low_stock_enabled {
        alerts.extend(products.into_iter().filter_map(stock_alert));
    }
    alerts.extend(
        debts
            .into_iter()
            .filter_map(|debt| debt_alert(debt, settings, now)),
    );
    alerts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.due_date.cmp(&b.due_date))
    });
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopkeep_accounting::{Reference, ReferenceType};
    use shopkeep_core::{ActorId, Aggregate, AggregateId};
    use shopkeep_debts::{DebtCommand, DebtId, DebtorId, OpenDebt};
    use shopkeep_inventory::{ProductId, RegisterProduct, StockCommand, StockLevels};

    fn product(name: &str, qty: i64, min_level: i64) -> ProductStock {
        let id = ProductId::new(AggregateId::new());
        let mut p = ProductStock::empty(id);
        let events = p
            .handle(&StockCommand::Register(RegisterProduct {
                product_id: id,
                name: name.to_string(),
                category: None,
                unit_cost: Money::from_major(1),
                min_level,
                opening: StockLevels { warehouse: qty, shop: 0 },
                date: Utc::now(),
                created_by: ActorId::new(),
            }))
            .unwrap();
        for e in &events {
            p.apply(e);
        }
        p
    }

    fn debt(kind: DebtorKind, due_in_days: i64) -> Debt {
        let debtor = DebtorId::new("d-1").unwrap();
        let reference = Reference::new(ReferenceType::Invoice, AggregateId::new().to_string());
        let id = DebtId::for_reference(kind, &debtor, &reference);
        let mut d = Debt::empty(id);
        let events = d
            .handle(&DebtCommand::Open(OpenDebt {
                debt_id: id,
                debtor_kind: kind,
                debtor_id: debtor,
                reference,
                description: None,
                amount: Money::from_major(50),
                due_date: Utc::now() + Duration::days(due_in_days),
                opened_at: Utc::now(),
                opened_by: ActorId::new(),
            }))
            .unwrap();
        for e in &events {
            d.apply(e);
        }
        d
    }

    #[test]
    fn stock_alerts_follow_min_level() {
        let products = [product("Nails", 0, 5), product("Screws", 3, 5), product("Glue", 9, 5)];
        let alerts = scan_alerts(&products, [], &AlertSettings::default(), Utc::now());

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].kind, AlertKind::OutOfStock);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[1].kind, AlertKind::LowStock);
        assert!(alerts.iter().all(|a| a.action == SuggestedAction::Reorder));
    }

    #[test]
    fn stock_alerts_can_be_disabled() {
        let products = [product("Nails", 0, 5)];
        let settings = AlertSettings {
            low_stock_enabled: false,
            ..AlertSettings::default()
        };
        assert!(scan_alerts(&products, [], &settings, Utc::now()).is_empty());
    }

    #[test]
    fn debts_alert_when_overdue_or_due_soon() {
        let debts = [
            debt(DebtorKind::Customer, -2),
            debt(DebtorKind::Supplier, 2),
            debt(DebtorKind::Customer, 30),
        ];
        let alerts = scan_alerts([], &debts, &AlertSettings::default(), Utc::now());

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].kind, AlertKind::PaymentOverdue);
        assert_eq!(alerts[0].action, SuggestedAction::CollectDebt);
        assert_eq!(alerts[1].kind, AlertKind::PaymentDueSoon);
        assert_eq!(alerts[1].action, SuggestedAction::PaySupplier);
        assert_eq!(alerts[1].amount, Some(Money::from_major(50)));
    }
}
