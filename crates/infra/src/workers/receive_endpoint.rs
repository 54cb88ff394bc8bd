use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{Instrument, error, info, info_span, warn};

use content_events::Subscription;

use super::{WorkerHandle, shutdown_channel, shutdown_requested};
use crate::messaging::{BusMessage, ReceiveEndpoint};

/// Drive `endpoint` from the bus subscription and its redelivery channel.
///
/// At most `prefetch` messages are in flight; shutdown waits for them.
/// Messages from an acknowledging subscription are acked only once their
/// delivery is settled (consumed, skipped, redelivery recorded, or
/// dead-lettered).
pub fn spawn_receive_endpoint(
    endpoint: Arc<ReceiveEndpoint>,
    mut subscription: Subscription<BusMessage>,
    mut redeliveries: UnboundedReceiver<BusMessage>,
    prefetch: usize,
) -> WorkerHandle {
    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let prefetch = prefetch.max(1);

    let join = tokio::spawn(async move {
        let in_flight = Arc::new(Semaphore::new(prefetch));
        let acknowledger = subscription.acknowledger();
        info!(endpoint = %endpoint.name(), prefetch, "receive endpoint started");

        loop {
            let (envelope, from_bus) = tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => break,
                Some(envelope) = subscription.recv() => (envelope, true),
                Some(envelope) = redeliveries.recv() => (envelope, false),
                else => break,
            };

            let permit = match in_flight.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let endpoint = endpoint.clone();
            let acknowledger = acknowledger.clone().filter(|_| from_bus);
            let span = info_span!("receive", endpoint = %endpoint.name());
            tokio::spawn(
                async move {
                    let message_id = envelope.message_id();
                    let outcome = endpoint.deliver(envelope).await;
                    match acknowledger {
                        Some(ack) if outcome.is_settled() => ack.ack(message_id),
                        Some(_) => warn!(%message_id, ?outcome, "delivery unsettled, left with the transport"),
                        None => {}
                    }
                    drop(permit);
                }
                .instrument(span),
            );
        }

        // Wait for in-flight deliveries.
        if in_flight.acquire_many(prefetch as u32).await.is_err() {
            error!("in-flight semaphore closed during shutdown");
        }
        info!(endpoint = %endpoint.name(), "receive endpoint stopped");
    });

    WorkerHandle::new("receive-endpoint", shutdown_tx, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use content_core::AggregateId;
    use std::sync::Mutex;

    use content_events::{
        Acknowledge, BusError, ConsumeContext, ConsumeError, Consumer, EventBus, EventEnvelope,
        InMemoryEventBus, IntegrationEvent,
    };
    use serde::{Deserialize, Serialize};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::messaging::{
        FaultPolicy, InMemoryErrorQueue, RedeliveryScheduler, TokioRedeliveryScheduler,
    };

    fn envelope(message_type: &'static str) -> BusMessage {
        EventEnvelope::new(
            Uuid::now_v7(),
            message_type,
            AggregateId::new(),
            "test",
            Utc::now(),
            serde_json::json!(null),
        )
    }

    async fn eventually(mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tock;

    impl IntegrationEvent for Tock {
        const MESSAGE_TYPE: &'static str = "test.tock";
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Consumer<Tick> for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn consume(&self, _context: ConsumeContext<Tick>) -> Result<(), ConsumeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct AlwaysFails {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Consumer<Tock> for AlwaysFails {
        fn name(&self) -> &'static str {
            "always-fails"
        }

        async fn consume(&self, _context: ConsumeContext<Tock>) -> Result<(), ConsumeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ConsumeError::failed("boom"))
        }
    }

    struct UnreachableScheduler;

    #[async_trait]
    impl RedeliveryScheduler for UnreachableScheduler {
        async fn schedule(&self, _envelope: BusMessage, _delay: Duration) -> Result<(), BusError> {
            Err(BusError::Transport("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingAcks {
        acked: Mutex<Vec<Uuid>>,
    }

    impl Acknowledge for RecordingAcks {
        fn ack(&self, message_id: Uuid) {
            self.acked.lock().unwrap().push(message_id);
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tick;

    impl IntegrationEvent for Tick {
        const MESSAGE_TYPE: &'static str = "test.tick";
    }

    /// Fails every first delivery, succeeds on redelivery.
    #[derive(Default)]
    struct SucceedsOnRedelivery {
        calls: AtomicU32,
        consumed: AtomicU32,
    }

    #[async_trait]
    impl Consumer<Tick> for SucceedsOnRedelivery {
        fn name(&self) -> &'static str {
            "succeeds-on-redelivery"
        }

        async fn consume(&self, context: ConsumeContext<Tick>) -> Result<(), ConsumeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if context.redelivery_count() == 0 {
                return Err(ConsumeError::failed("not yet"));
            }
            self.consumed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_message_is_consumed_after_the_delay() {
        let bus = Arc::new(InMemoryEventBus::<BusMessage>::new());
        let consumer = Arc::new(SucceedsOnRedelivery::default());
        let (scheduler, redeliveries) = TokioRedeliveryScheduler::channel();
        let endpoint = ReceiveEndpoint::builder("ContentService")
            .policy(FaultPolicy::new(1, vec![Duration::from_secs(60)]))
            .consumer::<Tick, _>(consumer.clone())
            .build(
                Arc::new(scheduler),
                Arc::new(InMemoryErrorQueue::for_endpoint("ContentService")),
            );
        let handle = spawn_receive_endpoint(Arc::new(endpoint), bus.subscribe(), redeliveries, 4);

        bus.publish(EventEnvelope::new(
            Uuid::now_v7(),
            Tick::MESSAGE_TYPE,
            AggregateId::new(),
            "test",
            Utc::now(),
            serde_json::json!(null),
        ))
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.shutdown().await;

        // Two failed attempts on first delivery, one success on redelivery.
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(consumer.consumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_keeps_the_endpoint_running() {
        let bus = Arc::new(InMemoryEventBus::<BusMessage>::new());
        let consumer = Arc::new(Counting::default());
        let (scheduler, redeliveries) = TokioRedeliveryScheduler::channel();
        let endpoint = ReceiveEndpoint::builder("ContentService")
            .consumer::<Tick, _>(consumer.clone())
            .build(
                Arc::new(scheduler),
                Arc::new(InMemoryErrorQueue::for_endpoint("ContentService")),
            );
        drop(spawn_receive_endpoint(Arc::new(endpoint), bus.subscribe(), redeliveries, 4));

        bus.publish(envelope(Tick::MESSAGE_TYPE)).await.unwrap();

        eventually(|| consumer.calls.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn only_settled_deliveries_are_acknowledged() {
        let counting = Arc::new(Counting::default());
        let failing = Arc::new(AlwaysFails::default());
        let endpoint = ReceiveEndpoint::builder("ContentService")
            .policy(FaultPolicy::new(0, vec![Duration::from_secs(300)]))
            .consumer::<Tick, _>(counting.clone())
            .consumer::<Tock, _>(failing.clone())
            .build(
                Arc::new(UnreachableScheduler),
                Arc::new(InMemoryErrorQueue::for_endpoint("ContentService")),
            );

        let acks = Arc::new(RecordingAcks::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let consumed = envelope(Tick::MESSAGE_TYPE);
        let skipped = envelope("test.unknown");
        let unsettled = envelope(Tock::MESSAGE_TYPE);
        for message in [consumed.clone(), skipped.clone(), unsettled.clone()] {
            tx.send(message).unwrap();
        }
        let (_scheduler, redeliveries) = TokioRedeliveryScheduler::channel();
        let handle = spawn_receive_endpoint(
            Arc::new(endpoint),
            Subscription::with_acknowledger(rx, acks.clone()),
            redeliveries,
            4,
        );

        eventually(|| {
            acks.acked.lock().unwrap().len() == 2 && failing.calls.load(Ordering::SeqCst) == 1
        })
        .await;
        handle.shutdown().await;

        let acked = acks.acked.lock().unwrap().clone();
        assert_eq!(acked.len(), 2);
        assert!(acked.contains(&consumed.message_id()));
        assert!(acked.contains(&skipped.message_id()));
        assert!(!acked.contains(&unsettled.message_id()));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
