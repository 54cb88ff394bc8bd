//! Domain & integration events, the bus abstraction and consumer contracts.

pub mod bus;
pub mod consumer;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

/// Integration events meant for other services / the message broker.
pub mod integration;

pub use bus::{Acknowledge, BusError, EventBus, Subscription};
pub use consumer::{ConsumeContext, ConsumeError, Consumer, IntegrationEvent};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::InMemoryEventBus;
pub use integration::CommentAddedEvent;
