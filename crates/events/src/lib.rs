//! Domain events and their distribution.
//!
//! Ledgers emit events after a movement transition has been persisted; consumers
//! (audit feeds, cache warmers, integrations) subscribe through an [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
