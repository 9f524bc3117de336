use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopkeep_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, Money};
use shopkeep_events::Event;

use crate::account::AccountName;

pub const JOURNAL_AGGREGATE_TYPE: &str = "accounting.journal";

/// Kind of business movement an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Sale,
    Purchase,
    Payment,
    Adjustment,
    Cogs,
    Expense,
    Income,
    Transfer,
    Return,
    ReturnCogs,
    WriteOff,
    Reversal,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Sale => "SALE",
            EntryType::Purchase => "PURCHASE",
            EntryType::Payment => "PAYMENT",
            EntryType::Adjustment => "ADJUSTMENT",
            EntryType::Cogs => "COGS",
            EntryType::Expense => "EXPENSE",
            EntryType::Income => "INCOME",
            EntryType::Transfer => "TRANSFER",
            EntryType::Return => "RETURN",
            EntryType::ReturnCogs => "RETURN_COGS",
            EntryType::WriteOff => "WRITE_OFF",
            EntryType::Reversal => "REVERSAL",
        }
    }
}

/// Kind of document an entry points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceType {
    Invoice,
    PurchaseOrder,
    Payment,
    Adjustment,
    PhysicalInventory,
    Manual,
    SalesReturn,
    Debt,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceType,
    pub id: String,
}

impl Reference {
    pub fn new(kind: ReferenceType, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

/// Journal identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JournalId(pub AggregateId);

impl JournalId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The store's single general journal.
    pub fn main() -> Self {
        Self(AggregateId::derived(JOURNAL_AGGREGATE_TYPE, "main"))
    }
}

impl core::fmt::Display for JournalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A validated, immutable journal entry.
///
/// One debit line and one credit line of the same amount, so every entry is
/// balanced by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub entry_type: EntryType,
    pub description: String,
    pub debit_account: AccountName,
    pub credit_account: AccountName,
    pub amount: Money,
    pub reference: Option<Reference>,
    pub created_by: ActorId,
    pub is_system_generated: bool,
    pub notes: Option<String>,
    /// Set on reversal entries: the entry being cancelled.
    pub reverses: Option<Uuid>,
}

impl JournalEntry {
    /// Signed effect of this entry on `account` (debit-positive).
    pub fn effect_on(&self, account: &AccountName) -> Money {
        if &self.debit_account == account {
            self.amount
        } else if &self.credit_account == account {
            -self.amount
        } else {
            Money::ZERO
        }
    }

    pub fn touches(&self, account: &AccountName) -> bool {
        &self.debit_account == account || &self.credit_account == account
    }
}

/// Command: post a new entry. Account names are normalized on handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntry {
    pub entry_id: Uuid,
    pub date: DateTime<Utc>,
    pub entry_type: EntryType,
    pub description: String,
    pub debit_account: String,
    pub credit_account: String,
    pub amount: Money,
    pub reference: Option<Reference>,
    pub created_by: ActorId,
    pub is_system_generated: bool,
    pub notes: Option<String>,
}

impl PostEntry {
    /// Manual entry with a fresh id, dated `date`.
    pub fn manual(
        debit_account: impl Into<String>,
        credit_account: impl Into<String>,
        amount: Money,
        description: impl Into<String>,
        date: DateTime<Utc>,
        created_by: ActorId,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            date,
            entry_type: EntryType::Adjustment,
            description: description.into(),
            debit_account: debit_account.into(),
            credit_account: credit_account.into(),
            amount,
            reference: None,
            created_by,
            is_system_generated: false,
            notes: None,
        }
    }

    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    pub fn with_reference(mut self, reference: Option<Reference>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn system_generated(mut self) -> Self {
        self.is_system_generated = true;
        self
    }
}

/// Command: cancel a posted entry with its mirror image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseEntry {
    pub entry_id: Uuid,
    pub original_entry_id: Uuid,
    pub date: DateTime<Utc>,
    pub reason: String,
    pub created_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalCommand {
    Post(PostEntry),
    Reverse(ReverseEntry),
}

/// Event: JournalEntryPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryPosted {
    pub journal_id: JournalId,
    pub entry: JournalEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEvent {
    EntryPosted(JournalEntryPosted),
}

impl Event for JournalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JournalEvent::EntryPosted(_) => "accounting.journal.entry_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JournalEvent::EntryPosted(e) => e.entry.date,
        }
    }
}

/// Aggregate root: Journal.
///
/// The journal does not hold balances. Its state is only what decisions
/// need: which entries exist (for reversal) and which were already reversed.
/// Balances are projections over `JournalEntryPosted` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    id: JournalId,
    version: u64,
    entries: HashMap<Uuid, JournalEntry>,
    reversed: HashSet<Uuid>,
}

impl Journal {
    /// Empty aggregate for rehydration.
    pub fn empty(id: JournalId) -> Self {
        Self {
            id,
            version: 0,
            entries: HashMap::new(),
            reversed: HashSet::new(),
        }
    }

    pub fn entry(&self, id: &Uuid) -> Option<&JournalEntry> {
        self.entries.get(id)
    }

    pub fn is_reversed(&self, id: &Uuid) -> bool {
        self.reversed.contains(id)
    }
}

impl AggregateRoot for Journal {
    type Id = JournalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Journal {
    type Command = JournalCommand;
    type Event = JournalEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            JournalEvent::EntryPosted(e) => {
                self.id = e.journal_id;
                if let Some(original) = e.entry.reverses {
                    self.reversed.insert(original);
                }
                self.entries.insert(e.entry.id, e.entry.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            JournalCommand::Post(cmd) => self.handle_post(cmd),
            JournalCommand::Reverse(cmd) => self.handle_reverse(cmd),
        }
    }

    fn check_invariants(&self) -> Result<(), Self::Error> {
        for entry in self.entries.values() {
            if !entry.amount.is_positive() || entry.debit_account == entry.credit_account {
                return Err(DomainError::invariant(format!(
                    "journal entry {} is not a valid double entry",
                    entry.id
                )));
            }
        }
        Ok(())
    }
}

impl Journal {
    fn handle_post(&self, cmd: &PostEntry) -> Result<Vec<JournalEvent>, DomainError> {
        if self.entries.contains_key(&cmd.entry_id) {
            return Err(DomainError::conflict(format!(
                "journal entry {} already posted",
                cmd.entry_id
            )));
        }
        cmd.amount.ensure_transaction_amount()?;

        let debit_account = AccountName::new(&cmd.debit_account)?;
        let credit_account = AccountName::new(&cmd.credit_account)?;
        if debit_account == credit_account {
            return Err(DomainError::SameAccount(debit_account.to_string()));
        }

        let description = cmd.description.trim();
        if description.is_empty() {
            return Err(DomainError::validation("description cannot be empty"));
        }
        if let Some(reference) = &cmd.reference {
            if reference.id.trim().is_empty() {
                return Err(DomainError::validation("reference id cannot be empty"));
            }
        }
        if cmd.entry_type == EntryType::Reversal {
            return Err(DomainError::validation(
                "reversal entries are posted through ReverseEntry",
            ));
        }

        Ok(vec![JournalEvent::EntryPosted(JournalEntryPosted {
            journal_id: self.id,
            entry: JournalEntry {
                id: cmd.entry_id,
                date: cmd.date,
                entry_type: cmd.entry_type,
                description: description.to_string(),
                debit_account,
                credit_account,
                amount: cmd.amount,
                reference: cmd.reference.clone(),
                created_by: cmd.created_by,
                is_system_generated: cmd.is_system_generated,
                notes: cmd.notes.clone().filter(|n| !n.trim().is_empty()),
                reverses: None,
            },
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseEntry) -> Result<Vec<JournalEvent>, DomainError> {
        let original = self
            .entries
            .get(&cmd.original_entry_id)
            .ok_or(DomainError::NotFound)?;

        if original.reverses.is_some() {
            return Err(DomainError::invalid_state("a reversal cannot be reversed"));
        }
        if self.reversed.contains(&original.id) {
            return Err(DomainError::invalid_state(format!(
                "journal entry {} is already reversed",
                original.id
            )));
        }
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("reversal reason cannot be empty"));
        }

        Ok(vec![JournalEvent::EntryPosted(JournalEntryPosted {
            journal_id: self.id,
            entry: JournalEntry {
                id: cmd.entry_id,
                date: cmd.date,
                entry_type: EntryType::Reversal,
                description: format!("Reversal: {}", original.description),
                debit_account: original.credit_account.clone(),
                credit_account: original.debit_account.clone(),
                amount: original.amount,
                reference: original.reference.clone(),
                created_by: cmd.created_by,
                is_system_generated: false,
                notes: Some(reason.to_string()),
                reverses: Some(original.id),
            },
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn journal() -> Journal {
        Journal::empty(JournalId::main())
    }

    fn post(debit: &str, credit: &str, minor: i64) -> JournalCommand {
        JournalCommand::Post(PostEntry::manual(
            debit,
            credit,
            Money::from_minor(minor),
            "test entry",
            Utc::now(),
            ActorId::new(),
        ))
    }

    fn run(journal: &mut Journal, cmd: &JournalCommand) -> Result<Vec<JournalEvent>, DomainError> {
        let events = journal.handle(cmd)?;
        for e in &events {
            journal.apply(e);
        }
        Ok(events)
    }

    fn posted(events: &[JournalEvent]) -> &JournalEntry {
        let JournalEvent::EntryPosted(e) = &events[0];
        &e.entry
    }

    #[test]
    fn posting_normalizes_account_names() {
        let mut j = journal();
        let events = run(&mut j, &post("  Cash ", "Sales  Revenue", 50_000)).unwrap();
        let entry = posted(&events);
        assert_eq!(entry.debit_account.as_str(), "Cash");
        assert_eq!(entry.credit_account.as_str(), "Sales Revenue");
        assert_eq!(j.version(), 1);
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let j = journal();
        assert!(matches!(
            j.handle(&post("Cash", "Sales Revenue", 0)),
            Err(DomainError::InvalidAmount(_))
        ));
        assert!(matches!(
            j.handle(&post("Cash", "Sales Revenue", -100)),
            Err(DomainError::InvalidAmount(_))
        ));
    }

    #[test]
    fn amount_above_the_cap_is_rejected() {
        let mut j = journal();
        run(&mut j, &post("Cash", "Sales Revenue", Money::MAX.minor())).unwrap();
        assert!(matches!(
            j.handle(&post("Cash", "Sales Revenue", i64::MAX / 2 + 1)),
            Err(DomainError::InvalidAmount(_))
        ));
    }

    #[test]
    fn same_account_after_normalization_is_rejected() {
        let j = journal();
        let err = j.handle(&post("Cash", " Cash  ", 100)).unwrap_err();
        assert_eq!(err, DomainError::SameAccount("Cash".to_string()));
    }

    #[test]
    fn empty_account_name_is_a_validation_error() {
        let j = journal();
        assert!(matches!(
            j.handle(&post("", "Cash", 100)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn reversal_swaps_sides_and_only_happens_once() {
        let mut j = journal();
        let events = run(&mut j, &post("Cash", "Sales Revenue", 1_000)).unwrap();
        let original = posted(&events).clone();

        let reverse = |entry_id| {
            JournalCommand::Reverse(ReverseEntry {
                entry_id,
                original_entry_id: original.id,
                date: Utc::now(),
                reason: "keyed twice".to_string(),
                created_by: ActorId::new(),
            })
        };

        let events = run(&mut j, &reverse(Uuid::now_v7())).unwrap();
        let reversal = posted(&events).clone();
        assert_eq!(reversal.entry_type, EntryType::Reversal);
        assert_eq!(reversal.debit_account, original.credit_account);
        assert_eq!(reversal.credit_account, original.debit_account);
        assert_eq!(reversal.reverses, Some(original.id));
        assert!(j.is_reversed(&original.id));

        let err = j.handle(&reverse(Uuid::now_v7())).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let err = j
            .handle(&JournalCommand::Reverse(ReverseEntry {
                entry_id: Uuid::now_v7(),
                original_entry_id: reversal.id,
                date: Utc::now(),
                reason: "undo".to_string(),
                created_by: ActorId::new(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn reversing_unknown_entry_is_not_found() {
        let j = journal();
        let err = j
            .handle(&JournalCommand::Reverse(ReverseEntry {
                entry_id: Uuid::now_v7(),
                original_entry_id: Uuid::now_v7(),
                date: Utc::now(),
                reason: "typo".to_string(),
                created_by: ActorId::new(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn event_type_is_stable() {
        let mut j = journal();
        let events = run(&mut j, &post("Cash", "Other Income", 10)).unwrap();
        assert_eq!(events[0].event_type(), "accounting.journal.entry_posted");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Any accepted sequence of postings nets to zero across all accounts.
        #[test]
        fn posted_entries_always_net_to_zero(
            postings in prop::collection::vec((0usize..4, 0usize..4, -50i64..1_000_000i64), 1..20)
        ) {
            const ACCOUNTS: [&str; 4] = ["Cash", "Bank", "Inventory", "Sales Revenue"];
            let mut j = journal();
            let mut total = Money::ZERO;

            for (d, c, minor) in postings {
                if let Ok(events) = run(&mut j, &post(ACCOUNTS[d], ACCOUNTS[c], minor)) {
                    let entry = posted(&events);
                    total += entry.effect_on(&entry.debit_account);
                    total += entry.effect_on(&entry.credit_account);
                }
            }

            prop_assert_eq!(total, Money::ZERO);
            prop_assert!(j.check_invariants().is_ok());
        }
    }
}
