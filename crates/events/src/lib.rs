//! Event primitives shared by the domain crates and the infrastructure layer.
//!
//! - [`Event`]: the contract every domain event enum implements.
//! - [`EventEnvelope`]: a committed event plus its stream metadata.
//! - [`EventBus`]: post-commit fan-out to read-only consumers.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
