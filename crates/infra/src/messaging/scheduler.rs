use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use content_events::BusError;

use super::BusMessage;

/// Delivers a message back to its endpoint after a delay.
///
/// `Ok` means the redelivery is recorded; the current delivery may then be
/// acknowledged.
#[async_trait]
pub trait RedeliveryScheduler: Send + Sync {
    async fn schedule(&self, envelope: BusMessage, delay: Duration) -> Result<(), BusError>;
}

/// In-process timer: sleeps on the runtime, then feeds the endpoint's
/// redelivery channel. Pending redeliveries are lost on restart.
#[derive(Debug, Clone)]
pub struct TokioRedeliveryScheduler {
    sender: UnboundedSender<BusMessage>,
}

impl TokioRedeliveryScheduler {
    /// Scheduler plus the receiver the endpoint worker drains.
    pub fn channel() -> (Self, UnboundedReceiver<BusMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl RedeliveryScheduler for TokioRedeliveryScheduler {
    async fn schedule(&self, envelope: BusMessage, delay: Duration) -> Result<(), BusError> {
        let sender = self.sender.clone();
        debug!(
            message_id = %envelope.message_id(),
            redelivery_count = envelope.redelivery_count(),
            delay_secs = delay.as_secs(),
            "redelivery scheduled"
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let message_id = envelope.message_id();
            if sender.send(envelope).is_err() {
                warn!(%message_id, "endpoint stopped before redelivery");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use content_core::AggregateId;
    use content_events::EventEnvelope;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn message_comes_back_after_the_delay() {
        let (scheduler, mut receiver) = TokioRedeliveryScheduler::channel();
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            "content.comment.added",
            AggregateId::new(),
            "content.comment",
            Utc::now(),
            serde_json::json!({}),
        )
        .redelivered();

        scheduler
            .schedule(envelope.clone(), Duration::from_secs(300))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(receiver.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(receiver.recv().await, Some(envelope));
    }
}
