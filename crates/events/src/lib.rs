//! Domain events, envelopes, pub/sub and saga mechanics.
//!
//! No business rules live here; the transfer, settlement and payables crates
//! define their own event enums on top of [`Event`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod saga;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use saga::{Saga, SagaFailure};
