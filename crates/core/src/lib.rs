//! `shopkeep-core`: domain foundation building blocks.
//!
//! Pure domain primitives shared by the accounting, inventory and debt
//! modules: identifiers, fixed-point money, the domain error model and the
//! aggregate execution contract. No infrastructure concerns live here.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{ActorId, AggregateId};
pub use money::Money;
pub use value_object::ValueObject;
