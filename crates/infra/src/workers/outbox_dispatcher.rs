//! Publishes committed outbox rows to the bus.
//!
//! Rows are published in commit order. The first publish failure ends the
//! batch so a later row never overtakes an earlier one; the failed row stays
//! pending and is retried on the next tick. A crash between publish and
//! `mark_published` republishes the row (at-least-once).
//!
//! A second timer sweeps published rows and consumed inbox records once they
//! are older than the retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use content_events::EventBus;

use super::{WorkerHandle, shutdown_channel, shutdown_requested};
use crate::config::OutboxConfig;
use crate::messaging::BusMessage;
use crate::outbox::{OutboxStore, PurgeReport};
use crate::persistence::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub published: usize,
    /// Whether the batch stopped on a publish failure.
    pub halted: bool,
}

pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus<BusMessage>>,
    batch_size: usize,
    query_delay: Duration,
    retention: Duration,
    cleanup_interval: Duration,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn EventBus<BusMessage>>,
        config: &OutboxConfig,
    ) -> Self {
        Self {
            store,
            bus,
            batch_size: config.batch_size.max(1),
            query_delay: config.query_delay(),
            retention: config.retention(),
            cleanup_interval: config.cleanup_interval(),
        }
    }

    /// Publish one batch of pending rows.
    #[instrument(skip(self), fields(batch_size = self.batch_size), err)]
    pub async fn poll_once(&self) -> Result<DispatchReport, PersistenceError> {
        let pending = self.store.fetch_pending(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(DispatchReport::default());
        }

        let mut published = Vec::with_capacity(pending.len());
        let mut halted = false;
        for message in &pending {
            match self.bus.publish(message.to_envelope()).await {
                Ok(()) => {
                    metrics::counter!("content_outbox_published_total", "message_type" => message.message_type.clone())
                        .increment(1);
                    published.push(message.id);
                }
                Err(err) => {
                    metrics::counter!("content_outbox_publish_failures_total").increment(1);
                    warn!(
                        message_id = %message.id,
                        message_type = %message.message_type,
                        attempts = message.attempts + 1,
                        error = %err,
                        "outbox publish failed, batch halted"
                    );
                    self.store.record_failure(message.id, &err.to_string()).await?;
                    halted = true;
                    break;
                }
            }
        }

        self.store.mark_published(&published, Utc::now()).await?;
        debug!(published = published.len(), halted, "outbox batch dispatched");

        Ok(DispatchReport {
            published: published.len(),
            halted,
        })
    }

    /// Delete rows that left the retention window.
    #[instrument(skip(self), fields(retention_secs = self.retention.as_secs()), err)]
    pub async fn purge_expired(&self) -> Result<PurgeReport, PersistenceError> {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let report = self.store.purge(cutoff).await?;
        if report != PurgeReport::default() {
            metrics::counter!("content_outbox_purged_total").increment(report.outbox);
            debug!(outbox = report.outbox, inbox = report.inbox, "expired delivery rows purged");
        }
        Ok(report)
    }

    /// Poll every `query_delay` and sweep every `cleanup_interval` until shut down.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = shutdown_channel();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.query_delay);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sweeper = tokio::time::interval(self.cleanup_interval);
            sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                query_delay_ms = self.query_delay.as_millis() as u64,
                retention_secs = self.retention.as_secs(),
                "outbox dispatcher started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                    _ = ticker.tick() => {
                        // A full batch means more may be waiting; keep draining.
                        loop {
                            match self.poll_once().await {
                                Ok(report) if report.published == self.batch_size && !report.halted => continue,
                                Ok(_) => break,
                                Err(err) => {
                                    error!(error = %err, "outbox poll failed");
                                    break;
                                }
                            }
                        }
                    }
                    _ = sweeper.tick() => {
                        if let Err(err) = self.purge_expired().await {
                            error!(error = %err, "outbox purge failed");
                        }
                    }
                }
            }

            info!("outbox dispatcher stopped");
        });

        WorkerHandle::new("outbox-dispatcher", shutdown_tx, join)
    }
}
