//! Standard double entries for recurring business transactions.
//!
//! Each recipe only builds `PostEntry` commands. Committing them together
//! with any stock or debt changes is the caller's unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopkeep_core::{ActorId, DomainError, Money};

use crate::account::{AccountName, ChartOfAccounts, ExpenseCategory};
use crate::journal::{EntryType, PostEntry, Reference};

/// How a sale or purchase is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    Cash,
    Bank,
    /// On account: creates a receivable or payable instead of moving funds.
    Credit,
}

/// How a sales return is refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundChannel {
    Cash,
    /// Reduces what the customer owes.
    Credit,
}

/// Which side of a debt a settlement or write-off closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementSide {
    /// Money owed to the store by a customer.
    Receivable,
    /// Money the store owes a supplier.
    Payable,
}

/// Shared fields of every entry produced for one business transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingContext {
    pub date: DateTime<Utc>,
    pub actor: ActorId,
    pub reference: Option<Reference>,
}

impl PostingContext {
    pub fn new(date: DateTime<Utc>, actor: ActorId) -> Self {
        Self {
            date,
            actor,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    fn entry(
        &self,
        entry_type: EntryType,
        debit: &AccountName,
        credit: &AccountName,
        amount: Money,
        description: String,
    ) -> PostEntry {
        PostEntry {
            entry_id: Uuid::now_v7(),
            date: self.date,
            entry_type,
            description,
            debit_account: debit.to_string(),
            credit_account: credit.to_string(),
            amount,
            reference: self.reference.clone(),
            created_by: self.actor,
            is_system_generated: true,
            notes: None,
        }
    }

    fn reference_label(&self) -> String {
        self.reference
            .as_ref()
            .map(|r| format!(" {}", r.id))
            .unwrap_or_default()
    }
}

fn funds_account(chart: &ChartOfAccounts, channel: PaymentChannel) -> Option<&AccountName> {
    match channel {
        PaymentChannel::Cash => Some(&chart.cash),
        PaymentChannel::Bank => Some(&chart.bank),
        PaymentChannel::Credit => None,
    }
}

/// Sale: proceeds against revenue, then cost of goods against inventory.
///
/// The COGS entry is skipped when `cost` is zero (e.g. services).
pub fn sale_entries(
    chart: &ChartOfAccounts,
    ctx: &PostingContext,
    total: Money,
    cost: Money,
    channel: PaymentChannel,
) -> Vec<PostEntry> {
    let debit = funds_account(chart, channel).unwrap_or(&chart.receivables);
    let label = ctx.reference_label();

    let mut entries = vec![ctx.entry(
        EntryType::Sale,
        debit,
        &chart.sales_revenue,
        total,
        format!("Sale{label}"),
    )];
    if cost.is_positive() {
        entries.push(ctx.entry(
            EntryType::Cogs,
            &chart.cost_of_goods_sold,
            &chart.inventory,
            cost,
            format!("Cost of goods sold{label}"),
        ));
    }
    entries
}

/// Purchase receipt: inventory against funds or payables.
pub fn purchase_entries(
    chart: &ChartOfAccounts,
    ctx: &PostingContext,
    total: Money,
    channel: PaymentChannel,
) -> Vec<PostEntry> {
    let credit = funds_account(chart, channel).unwrap_or(&chart.payables);
    vec![ctx.entry(
        EntryType::Purchase,
        &chart.inventory,
        credit,
        total,
        format!("Purchase{}", ctx.reference_label()),
    )]
}

pub fn expense_entry(
    chart: &ChartOfAccounts,
    ctx: &PostingContext,
    amount: Money,
    category: ExpenseCategory,
    description: &str,
) -> PostEntry {
    let mut entry = ctx.entry(
        EntryType::Expense,
        chart.expense_account(category),
        &chart.cash,
        amount,
        description.to_string(),
    );
    entry.is_system_generated = false;
    entry
}

pub fn income_entry(
    chart: &ChartOfAccounts,
    ctx: &PostingContext,
    amount: Money,
    description: &str,
) -> PostEntry {
    let mut entry = ctx.entry(
        EntryType::Income,
        &chart.cash,
        &chart.other_income,
        amount,
        description.to_string(),
    );
    entry.is_system_generated = false;
    entry
}

/// Sales return: refund against sales returns, then the goods back into
/// inventory at cost.
pub fn sales_return_entries(
    chart: &ChartOfAccounts,
    ctx: &PostingContext,
    refund: Money,
    cost: Money,
    channel: RefundChannel,
) -> Vec<PostEntry> {
    let credit = match channel {
        RefundChannel::Cash => &chart.cash,
        RefundChannel::Credit => &chart.receivables,
    };
    let label = ctx.reference_label();

    let mut entries = Vec::new();
    if refund.is_positive() {
        entries.push(ctx.entry(
            EntryType::Return,
            &chart.sales_returns,
            credit,
            refund,
            format!("Sales return{label}"),
        ));
    }
    if cost.is_positive() {
        entries.push(ctx.entry(
            EntryType::ReturnCogs,
            &chart.inventory,
            &chart.cost_of_goods_sold,
            cost,
            format!("Returned goods to inventory{label}"),
        ));
    }
    entries
}

/// Mirror of a debt payment: funds in for receivables, out for payables.
pub fn settlement_entry(
    chart: &ChartOfAccounts,
    ctx: &PostingContext,
    side: SettlementSide,
    amount: Money,
    channel: PaymentChannel,
) -> Result<PostEntry, DomainError> {
    let funds = funds_account(chart, channel)
        .ok_or_else(|| DomainError::validation("a debt payment must move cash or bank funds"))?;
    let label = ctx.reference_label();

    Ok(match side {
        SettlementSide::Receivable => ctx.entry(
            EntryType::Payment,
            funds,
            &chart.receivables,
            amount,
            format!("Customer payment{label}"),
        ),
        SettlementSide::Payable => ctx.entry(
            EntryType::Payment,
            &chart.payables,
            funds,
            amount,
            format!("Supplier payment{label}"),
        ),
    })
}

/// Write-off of an outstanding balance: a loss on receivables, a gain on
/// payables.
pub fn write_off_entry(
    chart: &ChartOfAccounts,
    ctx: &PostingContext,
    side: SettlementSide,
    amount: Money,
    reason: &str,
) -> PostEntry {
    let (debit, credit) = match side {
        SettlementSide::Receivable => (&chart.bad_debt_expense, &chart.receivables),
        SettlementSide::Payable => (&chart.payables, &chart.debt_write_off_gain),
    };
    ctx.entry(
        EntryType::WriteOff,
        debit,
        credit,
        amount,
        format!("Debt write-off{}", ctx.reference_label()),
    )
    .with_notes(reason)
}

/// Valuation of a physical count: one shortage entry and/or one surplus
/// entry, skipping zero values.
pub fn inventory_variance_entries(
    chart: &ChartOfAccounts,
    ctx: &PostingContext,
    shortage_value: Money,
    surplus_value: Money,
) -> Vec<PostEntry> {
    let label = ctx.reference_label();
    let mut entries = Vec::new();
    if shortage_value.is_positive() {
        entries.push(ctx.entry(
            EntryType::Adjustment,
            &chart.inventory_shortage,
            &chart.inventory,
            shortage_value,
            format!("Inventory shortage{label}"),
        ));
    }
    if surplus_value.is_positive() {
        entries.push(ctx.entry(
            EntryType::Adjustment,
            &chart.inventory,
            &chart.inventory_surplus,
            surplus_value,
            format!("Inventory surplus{label}"),
        ));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::ReferenceType;

    fn ctx() -> PostingContext {
        PostingContext::new(Utc::now(), ActorId::new())
            .with_reference(Reference::new(ReferenceType::Invoice, "INV-7"))
    }

    fn sides(entry: &PostEntry) -> (&str, &str) {
        (entry.debit_account.as_str(), entry.credit_account.as_str())
    }

    #[test]
    fn credit_sale_books_receivable_and_cogs() {
        let chart = ChartOfAccounts::default();
        let entries = sale_entries(
            &chart,
            &ctx(),
            Money::from_major(120),
            Money::from_major(80),
            PaymentChannel::Credit,
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(sides(&entries[0]), ("Accounts Receivable", "Sales Revenue"));
        assert_eq!(sides(&entries[1]), ("Cost of Goods Sold", "Inventory"));
        assert_eq!(entries[0].description, "Sale INV-7");
        assert!(entries.iter().all(|e| e.is_system_generated));
    }

    #[test]
    fn zero_cost_sale_has_no_cogs_entry() {
        let chart = ChartOfAccounts::default();
        let entries = sale_entries(
            &chart,
            &ctx(),
            Money::from_major(10),
            Money::ZERO,
            PaymentChannel::Cash,
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(sides(&entries[0]), ("Cash", "Sales Revenue"));
    }

    #[test]
    fn purchase_on_credit_books_payable() {
        let chart = ChartOfAccounts::default();
        let entries = purchase_entries(&chart, &ctx(), Money::from_major(300), PaymentChannel::Credit);
        assert_eq!(sides(&entries[0]), ("Inventory", "Accounts Payable"));
    }

    #[test]
    fn expenses_use_category_accounts() {
        let chart = ChartOfAccounts::default();
        let entry = expense_entry(
            &chart,
            &PostingContext::new(Utc::now(), ActorId::new()),
            Money::from_major(900),
            ExpenseCategory::Rent,
            "March rent",
        );
        assert_eq!(sides(&entry), ("Rent Expense", "Cash"));
        assert!(!entry.is_system_generated);
    }

    #[test]
    fn supplier_settlement_pays_out_of_bank() {
        let chart = ChartOfAccounts::default();
        let entry = settlement_entry(
            &chart,
            &ctx(),
            SettlementSide::Payable,
            Money::from_major(50),
            PaymentChannel::Bank,
        )
        .unwrap();
        assert_eq!(sides(&entry), ("Accounts Payable", "Bank"));
        assert_eq!(entry.entry_type, EntryType::Payment);
    }

    #[test]
    fn settlement_on_credit_is_rejected() {
        let chart = ChartOfAccounts::default();
        let err = settlement_entry(
            &chart,
            &ctx(),
            SettlementSide::Receivable,
            Money::from_major(50),
            PaymentChannel::Credit,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn write_off_direction_depends_on_side() {
        let chart = ChartOfAccounts::default();
        let loss = write_off_entry(&chart, &ctx(), SettlementSide::Receivable, Money::from_major(5), "gone");
        let gain = write_off_entry(&chart, &ctx(), SettlementSide::Payable, Money::from_major(5), "waived");
        assert_eq!(sides(&loss), ("Bad Debt Expense", "Accounts Receivable"));
        assert_eq!(sides(&gain), ("Accounts Payable", "Debt Write-off Gain"));
        assert_eq!(loss.notes.as_deref(), Some("gone"));
    }

    #[test]
    fn variance_entries_skip_zero_sides() {
        let chart = ChartOfAccounts::default();
        let entries = inventory_variance_entries(&chart, &ctx(), Money::from_major(12), Money::ZERO);
        assert_eq!(entries.len(), 1);
        assert_eq!(sides(&entries[0]), ("Inventory Shortage Expense", "Inventory"));

        let both = inventory_variance_entries(&chart, &ctx(), Money::from_major(1), Money::from_major(2));
        assert_eq!(sides(&both[1]), ("Inventory", "Inventory Surplus Income"));
    }

    #[test]
    fn return_refunds_and_restocks() {
        let chart = ChartOfAccounts::default();
        let entries = sales_return_entries(
            &chart,
            &ctx(),
            Money::from_major(40),
            Money::from_major(25),
            RefundChannel::Cash,
        );
        assert_eq!(sides(&entries[0]), ("Sales Returns", "Cash"));
        assert_eq!(sides(&entries[1]), ("Inventory", "Cost of Goods Sold"));
        assert_eq!(entries[1].entry_type, EntryType::ReturnCogs);
    }
}
