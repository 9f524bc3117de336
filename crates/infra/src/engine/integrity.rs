use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info};

use shopkeep_accounting::{trial_balance, ChartOfAccounts, EntryType};
use shopkeep_core::{Aggregate, Money};
use shopkeep_debts::DebtorKind;
use shopkeep_events::{EventBus, EventEnvelope};

use super::BackOffice;
use crate::error::EngineError;
use crate::event_store::EventStore;
use crate::projections::ReadModel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityViolation {
    /// `product <id>`, `debt <id>`, `journal entry JE-000001`, ...
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Global position the replay stopped at.
    pub position: u64,
    pub products_checked: usize,
    pub debts_checked: usize,
    pub entries_checked: usize,
    pub trial_balance_difference: Money,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

impl<S, B> BackOffice<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Replay every stream and check the stock, debt and double-entry
    /// invariants. A stream that cannot be replayed at all is an error.
    pub fn verify_integrity(&self) -> Result<IntegrityReport, EngineError> {
        let model = ReadModel::load(self.store())?;
        let mut violations = Vec::new();

        for (id, product) in &model.products {
            if let Err(e) = product.check_invariants() {
                violations.push(IntegrityViolation {
                    subject: format!("product {id}"),
                    message: e.to_string(),
                });
            }
        }
        for (id, debt) in &model.debts {
            if let Err(e) = debt.check_invariants() {
                violations.push(IntegrityViolation {
                    subject: format!("debt {id}"),
                    message: e.to_string(),
                });
            }
        }
        for posted in &model.entries {
            let entry = &posted.entry;
            if !entry.amount.is_positive() || entry.debit_account == entry.credit_account {
                violations.push(IntegrityViolation {
                    subject: format!("journal entry {}", posted.number_label()),
                    message: format!(
                        "{} -> {} for {} is not a valid double entry",
                        entry.debit_account, entry.credit_account, entry.amount
                    ),
                });
            }
        }

        violations.extend(document_debt_mismatches(&model, self.accounts()));

        let balance = trial_balance(&model.entries, None);
        if !balance.is_balanced {
            violations.push(IntegrityViolation {
                subject: "trial balance".to_string(),
                message: format!(
                    "debits {} != credits {}",
                    balance.total_debit, balance.total_credit
                ),
            });
        }

        for v in &violations {
            error!(subject = %v.subject, message = %v.message, "integrity violation");
        }
        let report = IntegrityReport {
            position: model.position,
            products_checked: model.products.len(),
            debts_checked: model.debts.len(),
            entries_checked: model.entries.len(),
            trial_balance_difference: balance.difference,
            violations,
        };
        info!(
            position = report.position,
            violations = report.violations.len(),
            "integrity check finished"
        );
        Ok(report)
    }
}

/// Every credit sale debits receivables and every credit purchase credits
/// payables with exactly the original amount of the debt opened for the same
/// document. Documents without such a posting (debts opened on their own)
/// are not compared.
fn document_debt_mismatches(model: &ReadModel, chart: &ChartOfAccounts) -> Vec<IntegrityViolation> {
    let mut posted: BTreeMap<(DebtorKind, &str), Money> = BTreeMap::new();
    for p in &model.entries {
        let entry = &p.entry;
        let Some(reference) = &entry.reference else {
            continue;
        };
        let kind = match entry.entry_type {
            EntryType::Sale if entry.debit_account == chart.receivables => DebtorKind::Customer,
            EntryType::Purchase if entry.credit_account == chart.payables => DebtorKind::Supplier,
            _ => continue,
        };
        *posted.entry((kind, reference.id.as_str())).or_insert(Money::ZERO) += entry.amount;
    }

    let mut opened: BTreeMap<(DebtorKind, &str), Money> = BTreeMap::new();
    for debt in model.debts.values() {
        if let Some(reference) = debt.reference() {
            *opened
                .entry((debt.debtor_kind(), reference.id.as_str()))
                .or_insert(Money::ZERO) += debt.original_amount();
        }
    }

    posted
        .into_iter()
        .filter_map(|((kind, document), ledger)| {
            let debts = opened.get(&(kind, document)).copied().unwrap_or(Money::ZERO);
            (ledger != debts).then(|| IntegrityViolation {
                subject: format!("document {document}"),
                message: format!("{kind:?} ledger postings {ledger} != debts opened {debts}"),
            })
        })
        .collect()
}
