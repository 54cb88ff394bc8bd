//! Bus-side messaging: receive endpoint, fault policy, redelivery and error queue.

pub mod endpoint;
pub mod error_queue;
pub mod policy;
pub mod scheduler;

use serde_json::Value as JsonValue;

use content_events::EventEnvelope;

pub use endpoint::{DeliveryOutcome, ReceiveEndpoint, ReceiveEndpointBuilder};
pub use error_queue::{ErrorQueue, FaultedMessage, InMemoryErrorQueue, error_queue_name};
pub use policy::{FaultAction, FaultPolicy};
pub use scheduler::{RedeliveryScheduler, TokioRedeliveryScheduler};

/// What travels over the bus: an outbox row as an envelope with a JSON payload.
pub type BusMessage = EventEnvelope<JsonValue>;
