//! Receive endpoint: routes envelopes to consumers and applies the fault policy.
//!
//! ```text
//! envelope ─► consumer for message_type ──ok──► consumed
//!                 │ fail (× attempts_per_delivery)
//!                 ▼
//!          FaultPolicy::on_exhausted ──► RedeliveryScheduler (delay, count + 1)
//!                                   └──► ErrorQueue (`<endpoint>_error`)
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use content_events::{ConsumeContext, ConsumeError, Consumer, IntegrationEvent};

use super::error_queue::{ErrorQueue, FaultedMessage};
use super::policy::{FaultAction, FaultPolicy};
use super::scheduler::RedeliveryScheduler;
use super::BusMessage;

/// How one delivery of an envelope ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The consumer succeeded on attempt `attempts`.
    Consumed { attempts: u32 },
    /// No consumer is registered for the message type.
    Skipped,
    /// Every attempt failed; the message comes back later.
    Redelivered { redelivery_count: u32, delay: Duration },
    /// Moved to the error queue.
    DeadLettered { reason: String },
    /// The redelivery or error-queue write failed; the message must stay
    /// with the transport.
    Unsettled { reason: String },
}

impl DeliveryOutcome {
    /// Whether the transport may forget the message.
    pub fn is_settled(&self) -> bool {
        !matches!(self, DeliveryOutcome::Unsettled { .. })
    }
}

/// Type-erased consumer: decodes the JSON payload, then calls the consumer.
#[async_trait]
trait MessageHandler: Send + Sync {
    fn consumer_name(&self) -> &'static str;

    async fn handle(&self, envelope: &BusMessage) -> Result<(), ConsumeError>;
}

struct TypedHandler<M, C> {
    consumer: Arc<C>,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, C> MessageHandler for TypedHandler<M, C>
where
    M: IntegrationEvent,
    C: Consumer<M> + 'static,
{
    fn consumer_name(&self) -> &'static str {
        self.consumer.name()
    }

    async fn handle(&self, envelope: &BusMessage) -> Result<(), ConsumeError> {
        let message: M = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ConsumeError::Malformed(e.to_string()))?;

        self.consumer
            .consume(ConsumeContext::new(
                envelope.message_id(),
                envelope.redelivery_count(),
                message,
            ))
            .await
    }
}

pub struct ReceiveEndpointBuilder {
    name: String,
    policy: FaultPolicy,
    handlers: HashMap<&'static str, Arc<dyn MessageHandler>>,
}

impl ReceiveEndpointBuilder {
    pub fn policy(mut self, policy: FaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register `consumer` for `M::MESSAGE_TYPE`, replacing any earlier one.
    pub fn consumer<M, C>(mut self, consumer: Arc<C>) -> Self
    where
        M: IntegrationEvent,
        C: Consumer<M> + 'static,
    {
        self.handlers.insert(
            M::MESSAGE_TYPE,
            Arc::new(TypedHandler::<M, C> {
                consumer,
                _message: PhantomData,
            }),
        );
        self
    }

    pub fn build(
        self,
        scheduler: Arc<dyn RedeliveryScheduler>,
        error_queue: Arc<dyn ErrorQueue>,
    ) -> ReceiveEndpoint {
        ReceiveEndpoint {
            name: self.name,
            policy: self.policy,
            handlers: self.handlers,
            scheduler,
            error_queue,
        }
    }
}

pub struct ReceiveEndpoint {
    name: String,
    policy: FaultPolicy,
    handlers: HashMap<&'static str, Arc<dyn MessageHandler>>,
    scheduler: Arc<dyn RedeliveryScheduler>,
    error_queue: Arc<dyn ErrorQueue>,
}

impl ReceiveEndpoint {
    pub fn builder(name: impl Into<String>) -> ReceiveEndpointBuilder {
        ReceiveEndpointBuilder {
            name: name.into(),
            policy: FaultPolicy::default(),
            handlers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handles(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    #[instrument(
        skip(self, envelope),
        fields(
            endpoint = %self.name,
            message_id = %envelope.message_id(),
            message_type = %envelope.message_type(),
            redelivery_count = envelope.redelivery_count()
        )
    )]
    pub async fn deliver(&self, envelope: BusMessage) -> DeliveryOutcome {
        let Some(handler) = self.handlers.get(envelope.message_type()) else {
            debug!("no consumer registered, skipping");
            metrics::counter!("content_consumer_skipped_total", "endpoint" => self.name.clone())
                .increment(1);
            return DeliveryOutcome::Skipped;
        };
        let consumer = handler.consumer_name();

        let attempts = self.policy.attempts_per_delivery();
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match handler.handle(&envelope).await {
                Ok(()) => {
                    metrics::counter!("content_consumer_consumed_total", "consumer" => consumer)
                        .increment(1);
                    debug!(consumer, attempt, "message consumed");
                    return DeliveryOutcome::Consumed { attempts: attempt };
                }
                Err(ConsumeError::Malformed(reason)) => {
                    warn!(consumer, %reason, "payload could not be decoded");
                    return self.dead_letter(envelope, consumer, reason).await;
                }
                Err(ConsumeError::Failed(reason)) => {
                    warn!(consumer, attempt, max_attempts = attempts, %reason, "consumer failed");
                    if attempt < attempts {
                        metrics::counter!("content_consumer_retries_total", "consumer" => consumer)
                            .increment(1);
                    }
                    last_error = reason;
                }
            }
        }

        match self.policy.on_exhausted(envelope.redelivery_count()) {
            FaultAction::Redeliver {
                delay,
                redelivery_count,
            } => {
                info!(consumer, redelivery_count, delay_secs = delay.as_secs(), "scheduling redelivery");
                metrics::counter!("content_consumer_redeliveries_total", "consumer" => consumer)
                    .increment(1);
                if let Err(err) = self.scheduler.schedule(envelope.redelivered(), delay).await {
                    error!(consumer, error = %err, "failed to schedule redelivery");
                    return DeliveryOutcome::Unsettled {
                        reason: err.to_string(),
                    };
                }
                DeliveryOutcome::Redelivered {
                    redelivery_count,
                    delay,
                }
            }
            FaultAction::DeadLetter => self.dead_letter(envelope, consumer, last_error).await,
        }
    }

    async fn dead_letter(
        &self,
        envelope: BusMessage,
        consumer: &'static str,
        reason: String,
    ) -> DeliveryOutcome {
        metrics::counter!("content_consumer_dead_letters_total", "consumer" => consumer)
            .increment(1);

        let faulted = FaultedMessage {
            envelope,
            consumer: consumer.to_string(),
            reason: reason.clone(),
            faulted_at: Utc::now(),
        };
        if let Err(err) = self.error_queue.move_to_error(faulted).await {
            error!(queue = %self.error_queue.name(), error = %err, "failed to move message to error queue");
            return DeliveryOutcome::Unsettled {
                reason: err.to_string(),
            };
        }

        DeliveryOutcome::DeadLettered { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use content_core::AggregateId;
    use content_events::{BusError, EventEnvelope};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use crate::messaging::InMemoryErrorQueue;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    impl IntegrationEvent for Ping {
        const MESSAGE_TYPE: &'static str = "test.ping";
    }

    /// Fails the first `fail_first` invocations.
    struct FlakyConsumer {
        fail_first: u32,
        calls: AtomicU32,
    }

    impl FlakyConsumer {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Consumer<Ping> for FlakyConsumer {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn consume(&self, _context: ConsumeContext<Ping>) -> Result<(), ConsumeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Err(ConsumeError::failed(format!("failure #{call}")))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        scheduled: Mutex<Vec<(BusMessage, Duration)>>,
    }

    #[async_trait]
    impl RedeliveryScheduler for RecordingScheduler {
        async fn schedule(&self, envelope: BusMessage, delay: Duration) -> Result<(), BusError> {
            self.scheduled.lock().unwrap().push((envelope, delay));
            Ok(())
        }
    }

    struct UnreachableScheduler;

    #[async_trait]
    impl RedeliveryScheduler for UnreachableScheduler {
        async fn schedule(&self, _envelope: BusMessage, _delay: Duration) -> Result<(), BusError> {
            Err(BusError::Transport("connection refused".to_string()))
        }
    }

    fn ping(redelivery_count: u32) -> BusMessage {
        let mut envelope = EventEnvelope::new(
            Uuid::now_v7(),
            Ping::MESSAGE_TYPE,
            AggregateId::new(),
            "test",
            Utc::now(),
            serde_json::json!({ "n": 1 }),
        );
        for _ in 0..redelivery_count {
            envelope = envelope.redelivered();
        }
        envelope
    }

    struct Harness {
        endpoint: ReceiveEndpoint,
        consumer: Arc<FlakyConsumer>,
        scheduler: Arc<RecordingScheduler>,
        errors: Arc<InMemoryErrorQueue>,
    }

    fn harness(fail_first: u32) -> Harness {
        let consumer = FlakyConsumer::new(fail_first);
        let scheduler = Arc::new(RecordingScheduler::default());
        let errors = Arc::new(InMemoryErrorQueue::for_endpoint("ContentService"));
        let endpoint = ReceiveEndpoint::builder("ContentService")
            .consumer::<Ping, _>(consumer.clone())
            .build(scheduler.clone(), errors.clone());
        Harness {
            endpoint,
            consumer,
            scheduler,
            errors,
        }
    }

    #[tokio::test]
    async fn succeeds_within_immediate_retries() {
        let h = harness(5);

        let outcome = h.endpoint.deliver(ping(0)).await;

        assert_eq!(outcome, DeliveryOutcome::Consumed { attempts: 6 });
        assert_eq!(h.consumer.calls(), 6);
        assert!(h.scheduler.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stops_after_five_retries_and_schedules_redelivery() {
        let h = harness(u32::MAX);

        let outcome = h.endpoint.deliver(ping(0)).await;

        assert_eq!(h.consumer.calls(), 6);
        assert_eq!(
            outcome,
            DeliveryOutcome::Redelivered {
                redelivery_count: 1,
                delay: Duration::from_secs(5 * 60)
            }
        );
        let scheduled = h.scheduler.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0.redelivery_count(), 1);
    }

    #[tokio::test]
    async fn walks_the_redelivery_schedule_then_dead_letters() {
        let h = harness(u32::MAX);
        let mut delays = Vec::new();

        let mut envelope = ping(0);
        loop {
            match h.endpoint.deliver(envelope.clone()).await {
                DeliveryOutcome::Redelivered { delay, .. } => {
                    delays.push(delay.as_secs() / 60);
                    envelope = h.scheduler.scheduled.lock().unwrap().pop().unwrap().0;
                }
                DeliveryOutcome::DeadLettered { reason } => {
                    assert_eq!(reason, "failure #24");
                    break;
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(delays, vec![5, 15, 30]);
        assert_eq!(h.consumer.calls(), 24);
        let faulted = h.errors.messages();
        assert_eq!(faulted.len(), 1);
        assert_eq!(faulted[0].consumer, "flaky");
        assert_eq!(faulted[0].envelope.redelivery_count(), 3);
        assert_eq!(h.errors.name(), "ContentService_error");
    }

    #[tokio::test]
    async fn failed_redelivery_scheduling_leaves_the_message_unsettled() {
        let consumer = FlakyConsumer::new(u32::MAX);
        let errors = Arc::new(InMemoryErrorQueue::for_endpoint("ContentService"));
        let endpoint = ReceiveEndpoint::builder("ContentService")
            .consumer::<Ping, _>(consumer.clone())
            .build(Arc::new(UnreachableScheduler), errors.clone());

        let outcome = endpoint.deliver(ping(0)).await;

        assert!(matches!(outcome, DeliveryOutcome::Unsettled { ref reason } if reason.contains("connection refused")));
        assert!(!outcome.is_settled());
        assert!(errors.messages().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_dead_lettered_without_retry() {
        let h = harness(0);
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            Ping::MESSAGE_TYPE,
            AggregateId::new(),
            "test",
            Utc::now(),
            serde_json::json!({ "unexpected": true }),
        );

        let outcome = h.endpoint.deliver(envelope).await;

        assert!(matches!(outcome, DeliveryOutcome::DeadLettered { .. }));
        assert_eq!(h.consumer.calls(), 0);
        assert_eq!(h.errors.messages().len(), 1);
    }

    #[tokio::test]
    async fn unknown_message_types_are_skipped() {
        let h = harness(0);
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            "content.post.created",
            AggregateId::new(),
            "content.post",
            Utc::now(),
            serde_json::json!({}),
        );

        assert!(!h.endpoint.handles("content.post.created"));
        assert_eq!(h.endpoint.deliver(envelope).await, DeliveryOutcome::Skipped);
        assert_eq!(h.consumer.calls(), 0);
    }
}
