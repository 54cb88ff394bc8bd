//! Consumer contracts for messages arriving on a receive endpoint.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

/// A message contract published on the bus under a stable type name.
pub trait IntegrationEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    const MESSAGE_TYPE: &'static str;
}

/// A decoded message plus its delivery metadata.
#[derive(Debug, Clone)]
pub struct ConsumeContext<M> {
    message_id: Uuid,
    redelivery_count: u32,
    message: M,
}

impl<M> ConsumeContext<M> {
    pub fn new(message_id: Uuid, redelivery_count: u32, message: M) -> Self {
        Self {
            message_id,
            redelivery_count,
            message,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn redelivery_count(&self) -> u32 {
        self.redelivery_count
    }

    pub fn message(&self) -> &M {
        &self.message
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsumeError {
    /// The payload could not be decoded into the consumer's contract.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The consumer ran and failed; the endpoint's retry policy decides what happens next.
    #[error("consumer failed: {0}")]
    Failed(String),
}

impl ConsumeError {
    pub fn failed(err: impl core::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Handles one message type.
///
/// Failures are retried by the endpoint and never roll back the transaction
/// that produced the message.
#[async_trait]
pub trait Consumer<M>: Send + Sync
where
    M: IntegrationEvent,
{
    /// Stable consumer name, used as the inbox key.
    fn name(&self) -> &'static str;

    async fn consume(&self, context: ConsumeContext<M>) -> Result<(), ConsumeError>;
}
