use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use shopkeep_accounting::{
    account_ledger, cash_balance, cashbox_day, chart_of_accounts, filter_entries, trial_balance,
    AccountLedger, AccountName, CashboxDay, EntryFilter, Journal, JournalCommand, LedgerOrder,
    Period, PostEntry, PostedEntry, Reference, ReverseEntry, TrialBalance,
};
use shopkeep_core::Money;
use shopkeep_events::{EventBus, EventEnvelope};

use super::{committed_entries, Actor, BackOffice};
use crate::error::EngineError;
use crate::event_store::EventStore;
use crate::projections::journal_entries;

impl<S, B> BackOffice<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Append one double entry to the journal.
    pub fn record_entry(&self, entry: PostEntry) -> Result<PostedEntry, EngineError> {
        let committed = self
            .dispatcher
            .run("record_entry", |uow| self.post(uow, vec![entry.clone()]))?;
        let posted = single_entry(committed_entries(&committed.events)?)?;
        info!(
            entry_number = %posted.number_label(),
            debit = %posted.entry.debit_account,
            credit = %posted.entry.credit_account,
            amount = %posted.entry.amount,
            "journal entry recorded"
        );
        Ok(posted)
    }

    /// A manual entry dated and attributed to `actor`.
    pub fn record_manual_entry(
        &self,
        debit_account: &str,
        credit_account: &str,
        amount: Money,
        description: &str,
        reference: Option<Reference>,
        actor: Actor,
    ) -> Result<PostedEntry, EngineError> {
        self.record_entry(
            PostEntry::manual(debit_account, credit_account, amount, description, actor.at, actor.id)
                .with_reference(reference),
        )
    }

    /// Post the mirror image of `original`. An entry can be reversed once.
    pub fn reverse_entry(&self, original: Uuid, reason: &str, actor: Actor) -> Result<PostedEntry, EngineError> {
        let committed = self.dispatcher.run("reverse_entry", |uow| {
            let mut journal: Journal = uow.load(self.journal.0)?;
            if journal.entry(&original).is_none() {
                return Err(EngineError::not_found(format!("journal entry {original}")));
            }
            uow.execute(
                &mut journal,
                &JournalCommand::Reverse(ReverseEntry {
                    entry_id: Uuid::now_v7(),
                    original_entry_id: original,
                    date: actor.at,
                    reason: reason.to_string(),
                    created_by: actor.id,
                }),
            )?;
            Ok(())
        })?;
        let posted = single_entry(committed_entries(&committed.events)?)?;
        info!(%original, reversal = %posted.number_label(), "journal entry reversed");
        Ok(posted)
    }

    /// Journal entries matching `filter`, newest first.
    pub fn entries(&self, filter: &EntryFilter) -> Result<Vec<PostedEntry>, EngineError> {
        let entries = journal_entries(self.store())?;
        Ok(filter_entries(&entries, filter).into_iter().cloned().collect())
    }

    pub fn ledger(&self, account: &str, period: Period, order: LedgerOrder) -> Result<AccountLedger, EngineError> {
        let account = AccountName::new(account)?;
        let entries = journal_entries(self.store())?;
        Ok(account_ledger(&entries, &account, period, order))
    }

    /// Trial balance over entries dated up to `as_of` (all when `None`).
    pub fn trial_balance(&self, as_of: Option<DateTime<Utc>>) -> Result<TrialBalance, EngineError> {
        let entries = journal_entries(self.store())?;
        Ok(trial_balance(&entries, as_of))
    }

    /// Final balance of `account`, debit-positive.
    pub fn balance(&self, account: &str) -> Result<Money, EngineError> {
        Ok(self.ledger(account, Period::all(), LedgerOrder::Chronological)?.final_balance)
    }

    pub fn cash_balance(&self) -> Result<Money, EngineError> {
        let entries = journal_entries(self.store())?;
        Ok(cash_balance(&entries, &self.accounts().cash))
    }

    pub fn cashbox(&self, day: NaiveDate) -> Result<CashboxDay, EngineError> {
        let entries = journal_entries(self.store())?;
        Ok(cashbox_day(&entries, &self.accounts().cash, day))
    }

    /// Every account that appears in the journal.
    pub fn accounts_in_use(&self) -> Result<Vec<AccountName>, EngineError> {
        Ok(chart_of_accounts(&journal_entries(self.store())?))
    }
}

fn single_entry(mut posted: Vec<PostedEntry>) -> Result<PostedEntry, EngineError> {
    match posted.len() {
        1 => Ok(posted.remove(0)),
        n => Err(EngineError::invariant(format!(
            "expected one committed journal entry, found {n}"
        ))),
    }
}
