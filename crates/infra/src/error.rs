//! Caller-facing error taxonomy.
//!
//! Every engine operation returns success or exactly one of these. Domain
//! and store errors are mapped here; `Conflict` and `PersistenceFailure` are
//! the only kinds the dispatcher retries.

use thiserror::Error;

use shopkeep_core::{DomainError, Money};

use crate::event_store::EventStoreError;

/// Input rejected before anything was written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid amount: {0}")]
    InvalidAmount(Money),

    #[error("debit and credit account are the same: {0}")]
    SameAccount(String),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("payment of {attempted} exceeds remaining amount {remaining}")]
    OverPayment { attempted: Money, remaining: Money },

    /// Concurrent writers kept colliding. Safe to retry the operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store failed. Nothing was committed; safe to retry the operation.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// A bug: state or stored data broke an invariant. Never retried.
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(ValidationError::Invalid(msg.into()))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        EngineError::InternalInvariantViolation(msg.into())
    }

    /// Whether the dispatcher may re-run the unit of work.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_) | EngineError::PersistenceFailure(_))
    }

    /// Map a domain error raised by the aggregate `subject`.
    pub(crate) fn from_domain(err: DomainError, subject: impl FnOnce() -> String) -> Self {
        match err {
            DomainError::NotFound => EngineError::NotFound(subject()),
            other => other.into(),
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                EngineError::Validation(ValidationError::Invalid(msg))
            }
            DomainError::InvalidAmount(amount) => {
                EngineError::Validation(ValidationError::InvalidAmount(amount))
            }
            DomainError::SameAccount(name) => {
                EngineError::Validation(ValidationError::SameAccount(name))
            }
            DomainError::InsufficientStock {
                requested,
                available,
            } => EngineError::InsufficientStock {
                requested,
                available,
            },
            DomainError::OverPayment {
                attempted,
                remaining,
            } => EngineError::OverPayment {
                attempted,
                remaining,
            },
            // Domain-level conflicts are duplicates ("already registered"):
            // retrying cannot help.
            DomainError::Conflict(msg) | DomainError::InvalidState(msg) => {
                EngineError::InvalidState(msg)
            }
            DomainError::InvariantViolation(msg) => EngineError::InternalInvariantViolation(msg),
            DomainError::NotFound => EngineError::NotFound("aggregate".to_string()),
        }
    }
}

impl From<EventStoreError> for EngineError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => EngineError::Conflict(msg),
            EventStoreError::Unavailable(msg) => EngineError::PersistenceFailure(msg),
            EventStoreError::AggregateTypeMismatch(msg)
            | EventStoreError::InvalidAppend(msg)
            | EventStoreError::Serialization(msg) => EngineError::InternalInvariantViolation(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_the_caller_taxonomy() {
        assert_eq!(
            EngineError::from(DomainError::SameAccount("Cash".into())),
            EngineError::Validation(ValidationError::SameAccount("Cash".into()))
        );
        assert!(matches!(
            EngineError::from(DomainError::conflict("product already registered")),
            EngineError::InvalidState(_)
        ));
        assert!(matches!(
            EngineError::from_domain(DomainError::NotFound, || "debt 42".into()),
            EngineError::NotFound(ref what) if what == "debt 42"
        ));
    }

    #[test]
    fn only_store_conflicts_and_outages_are_retryable() {
        assert!(EngineError::from(EventStoreError::Concurrency("x".into())).is_retryable());
        assert!(EngineError::from(EventStoreError::Unavailable("x".into())).is_retryable());
        assert!(!EngineError::from(EventStoreError::Serialization("x".into())).is_retryable());
        assert!(!EngineError::from(DomainError::conflict("dup")).is_retryable());
    }
}
