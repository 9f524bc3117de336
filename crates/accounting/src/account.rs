//! Account names and the standard chart of accounts.
//!
//! Accounts are not a master table: an account exists as soon as an entry
//! names it. To keep "Cash" and "Cash " from silently becoming two accounts,
//! every name is normalized when it enters the journal.

use serde::{Deserialize, Serialize};

use shopkeep_core::{DomainError, ValueObject};

/// Longest accepted account name, in characters.
pub const MAX_ACCOUNT_NAME_LEN: usize = 120;

/// Normalized account name.
///
/// Leading/trailing whitespace is removed and inner whitespace runs collapse
/// to a single space. Comparison is exact (case-sensitive) after that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountName(String);

impl ValueObject for AccountName {}

impl AccountName {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let normalized = raw.as_ref().split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return Err(DomainError::validation("account name cannot be empty"));
        }
        if normalized.chars().count() > MAX_ACCOUNT_NAME_LEN {
            return Err(DomainError::validation(format!(
                "account name longer than {MAX_ACCOUNT_NAME_LEN} characters"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// For compile-time names that are already normalized.
    fn standard(name: &'static str) -> Self {
        Self(name.to_string())
    }
}

impl TryFrom<String> for AccountName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountName> for String {
    fn from(value: AccountName) -> Self {
        value.0
    }
}

impl core::fmt::Display for AccountName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operating-expense buckets used by manual expense entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Rent,
    Utilities,
    Salaries,
    Supplies,
    Other,
}

/// Names of the accounts the engine posts to on its own.
///
/// Configurable so a store can keep its existing account names; any other
/// account can still be used through manual entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartOfAccounts {
    pub cash: AccountName,
    pub bank: AccountName,
    pub inventory: AccountName,
    pub receivables: AccountName,
    pub payables: AccountName,
    pub sales_revenue: AccountName,
    pub other_income: AccountName,
    pub cost_of_goods_sold: AccountName,
    pub rent_expense: AccountName,
    pub utilities_expense: AccountName,
    pub salaries_expense: AccountName,
    pub supplies_expense: AccountName,
    pub other_expense: AccountName,
    pub inventory_shortage: AccountName,
    pub inventory_surplus: AccountName,
    pub sales_returns: AccountName,
    pub bad_debt_expense: AccountName,
    pub debt_write_off_gain: AccountName,
}

impl Default for ChartOfAccounts {
    fn default() -> Self {
        Self {
            cash: AccountName::standard("Cash"),
            bank: AccountName::standard("Bank"),
            inventory: AccountName::standard("Inventory"),
            receivables: AccountName::standard("Accounts Receivable"),
            payables: AccountName::standard("Accounts Payable"),
            sales_revenue: AccountName::standard("Sales Revenue"),
            other_income: AccountName::standard("Other Income"),
            cost_of_goods_sold: AccountName::standard("Cost of Goods Sold"),
            rent_expense: AccountName::standard("Rent Expense"),
            utilities_expense: AccountName::standard("Utilities Expense"),
            salaries_expense: AccountName::standard("Salaries Expense"),
            supplies_expense: AccountName::standard("Supplies Expense"),
            other_expense: AccountName::standard("Other Expenses"),
            inventory_shortage: AccountName::standard("Inventory Shortage Expense"),
            inventory_surplus: AccountName::standard("Inventory Surplus Income"),
            sales_returns: AccountName::standard("Sales Returns"),
            bad_debt_expense: AccountName::standard("Bad Debt Expense"),
            debt_write_off_gain: AccountName::standard("Debt Write-off Gain"),
        }
    }
}

impl ChartOfAccounts {
    pub fn expense_account(&self, category: ExpenseCategory) -> &AccountName {
        match category {
            ExpenseCategory::Rent => &self.rent_expense,
            ExpenseCategory::Utilities => &self.utilities_expense,
            ExpenseCategory::Salaries => &self.salaries_expense,
            ExpenseCategory::Supplies => &self.supplies_expense,
            ExpenseCategory::Other => &self.other_expense,
        }
    }
}
