//! Read side: views rebuilt from the event store.
//!
//! - **Rebuildable**: every view can be reconstructed by replay
//! - **Idempotent**: bus consumers tolerate at-least-once delivery

pub mod debtor_balances;
pub mod read_model;

pub use debtor_balances::{DebtorBalanceError, DebtorBalancesProjection};
pub use read_model::{journal_entries, load_aggregates, replay_streams, MovementRecord, ReadModel};
