//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the **transport layer** for integration messages after they have
//! been committed to the outbox:
//!
//! ```text
//! Command → Unit of work (state + outbox rows) → Outbox dispatcher → Event Bus → Receive endpoint
//! ```
//!
//! Delivery is **at-least-once**: a crash between publish and marking the outbox
//! row as published republishes the message, so consumers must be idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};
use uuid::Uuid;

/// Settles a received message on transports that track deliveries.
///
/// Until acknowledged, a durable transport keeps the message and hands it out
/// again after a restart.
pub trait Acknowledge: Send + Sync {
    fn ack(&self, message_id: Uuid);
}

/// A subscription to an event stream.
///
/// Each subscription gets a copy of all messages published to the bus
/// (broadcast semantics). Messages arrive in publish order per publisher.
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
    acknowledger: Option<Arc<dyn Acknowledge>>,
}

impl<M> std::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("acknowledged", &self.acknowledger.is_some())
            .finish_non_exhaustive()
    }
}

impl<M> Subscription<M> {
    /// Fire-and-forget subscription; nothing needs acknowledging.
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self {
            receiver,
            acknowledger: None,
        }
    }

    /// Subscription whose messages must be acknowledged once handled.
    pub fn with_acknowledger(receiver: UnboundedReceiver<M>, acknowledger: Arc<dyn Acknowledge>) -> Self {
        Self {
            receiver,
            acknowledger: Some(acknowledger),
        }
    }

    pub fn acknowledger(&self) -> Option<Arc<dyn Acknowledge>> {
        self.acknowledger.clone()
    }

    /// Wait for the next message; `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    /// Publish failed due to internal lock poisoning.
    #[error("bus state poisoned")]
    Poisoned,

    /// The underlying transport rejected or failed the operation.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// `publish()` can fail (e.g. broker unreachable). The outbox dispatcher keeps
/// the row pending and retries on its next tick, so republishing is safe.
#[async_trait]
pub trait EventBus<M>: Send + Sync
where
    M: Send + 'static,
{
    async fn publish(&self, message: M) -> Result<(), BusError>;

    fn subscribe(&self) -> Subscription<M>;
}

#[async_trait]
impl<M, B> EventBus<M> for Arc<B>
where
    M: Send + 'static,
    B: EventBus<M> + ?Sized,
{
    async fn publish(&self, message: M) -> Result<(), BusError> {
        (**self).publish(message).await
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
