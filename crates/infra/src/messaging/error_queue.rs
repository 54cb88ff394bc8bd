use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use content_events::BusError;

use super::BusMessage;

/// Error queue name for a receive endpoint.
pub fn error_queue_name(endpoint: &str) -> String {
    format!("{endpoint}_error")
}

/// A message that exhausted retries and redeliveries (or could not be decoded).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultedMessage {
    pub envelope: BusMessage,
    pub consumer: String,
    pub reason: String,
    pub faulted_at: DateTime<Utc>,
}

/// Parking place for faulted messages, kept for manual inspection.
#[async_trait]
pub trait ErrorQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn move_to_error(&self, message: FaultedMessage) -> Result<(), BusError>;
}

#[derive(Debug)]
pub struct InMemoryErrorQueue {
    name: String,
    messages: Mutex<Vec<FaultedMessage>>,
}

impl InMemoryErrorQueue {
    pub fn for_endpoint(endpoint: &str) -> Self {
        Self {
            name: error_queue_name(endpoint),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<FaultedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ErrorQueue for InMemoryErrorQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn move_to_error(&self, message: FaultedMessage) -> Result<(), BusError> {
        error!(
            queue = %self.name,
            message_id = %message.envelope.message_id(),
            message_type = %message.envelope.message_type(),
            consumer = %message.consumer,
            reason = %message.reason,
            "message moved to error queue"
        );
        self.messages
            .lock()
            .map_err(|_| BusError::Poisoned)?
            .push(message);
        Ok(())
    }
}
