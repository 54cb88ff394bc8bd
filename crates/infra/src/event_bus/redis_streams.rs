//! Redis Streams-backed bus transport.
//!
//! ## Layout
//!
//! - **Stream key**: the receive endpoint name (`ContentService`)
//! - **Consumer group**: the endpoint name; every service instance joins it
//! - **Consumer**: `<endpoint>-<consumer_name>`, stable across restarts
//! - **Redelivery set**: sorted set `<endpoint>_redelivery`, scored by due time (ms)
//! - **Error queue**: stream `<endpoint>_error` (see [`RedisErrorQueue`])
//!
//! An entry is XACKed only after the endpoint settles its delivery. Entries
//! left unacknowledged stay in the consumer's pending list and are read again
//! from the backlog when the consumer next subscribes. Delayed redeliveries
//! are stored in the redelivery set and appended back to the stream by the
//! subscription once due.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::Commands;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use content_events::{Acknowledge, BusError, EventBus, Subscription};

use crate::messaging::{BusMessage, ErrorQueue, FaultedMessage, RedeliveryScheduler, error_queue_name};

/// Entries read per XREADGROUP call, and redeliveries promoted per pass.
const READ_COUNT: usize = 16;

/// XREADGROUP block timeout; bounds how long a dropped subscription lingers
/// and how late an acknowledgement or due redelivery is handled.
const BLOCK_MS: usize = 1000;

/// Sorted set holding delayed redeliveries for an endpoint.
pub fn redelivery_key(endpoint: &str) -> String {
    format!("{endpoint}_redelivery")
}

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<RedisStreamsError> for BusError {
    fn from(err: RedisStreamsError) -> Self {
        BusError::Transport(err.to_string())
    }
}

/// Where the next XREADGROUP starts.
///
/// A fresh subscription first re-reads its own pending entries (`0`, then
/// after the last id seen) and switches to new entries (`>`) once the
/// backlog comes back empty.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadCursor {
    Backlog(String),
    New,
}

impl ReadCursor {
    fn start() -> Self {
        Self::Backlog("0".to_string())
    }

    fn id(&self) -> &str {
        match self {
            Self::Backlog(after) => after,
            Self::New => ">",
        }
    }

    fn is_backlog(&self) -> bool {
        matches!(self, Self::Backlog(_))
    }

    fn advance(&mut self, last_entry: Option<&str>) {
        if let Self::Backlog(after) = self {
            match last_entry {
                Some(id) => *after = id.to_string(),
                None => *self = Self::New,
            }
        }
    }
}

/// Stream entries handed to the endpoint and not yet acknowledged.
#[derive(Debug, Default)]
struct PendingAcks(HashMap<Uuid, Vec<String>>);

impl PendingAcks {
    fn track(&mut self, message_id: Uuid, entry_id: String) {
        self.0.entry(message_id).or_default().push(entry_id);
    }

    fn take(&mut self, message_id: Uuid) -> Vec<String> {
        self.0.remove(&message_id).unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Forwards settled message ids to the subscription thread, which owns the
/// connection that XACKs them.
#[derive(Debug)]
struct RedisAcknowledger {
    sender: UnboundedSender<Uuid>,
}

impl Acknowledge for RedisAcknowledger {
    fn ack(&self, message_id: Uuid) {
        if self.sender.send(message_id).is_err() {
            debug!(%message_id, "subscription closed before acknowledgement");
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisStreamsEventBus {
    client: Arc<redis::Client>,
    stream_key: String,
    group: String,
    consumer: String,
    redelivery_key: String,
}

impl RedisStreamsEventBus {
    pub fn new(redis_url: impl AsRef<str>, endpoint: &str) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_key: endpoint.to_string(),
            group: endpoint.to_string(),
            consumer: format!("{endpoint}-{}", Uuid::now_v7()),
            redelivery_key: redelivery_key(endpoint),
        })
    }

    /// Use a stable consumer name so a restarted instance reclaims its
    /// unacknowledged entries.
    pub fn with_consumer(mut self, name: &str) -> Self {
        self.consumer = format!("{}-{name}", self.group);
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Ensure the endpoint's consumer group exists (idempotent).
    pub fn ensure_consumer_group(&self) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;

        // BUSYGROUP means it already exists.
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(&self.stream_key, &self.group, "0");
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    fn append_sync(&self, conn: &mut redis::Connection, message: &BusMessage) -> Result<(), RedisStreamsError> {
        let envelope = serde_json::to_string(message)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let _: String = conn
            .xadd(
                &self.stream_key,
                "*",
                &[
                    ("message_id", message.message_id().to_string()),
                    ("message_type", message.message_type().to_string()),
                    ("redelivery_count", message.redelivery_count().to_string()),
                    ("envelope", envelope),
                ],
            )
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    #[instrument(
        skip(self, message),
        fields(
            stream_key = %self.stream_key,
            message_id = %message.message_id(),
            message_type = %message.message_type()
        ),
        err
    )]
    fn publish_sync(&self, message: &BusMessage) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;
        self.append_sync(&mut conn, message)
    }

    fn read_group_sync(
        &self,
        conn: &mut redis::Connection,
        cursor: &ReadCursor,
    ) -> Result<Vec<StreamId>, RedisStreamsError> {
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(READ_COUNT);
        if !cursor.is_backlog() {
            options = options.block(BLOCK_MS);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[cursor.id()], &options)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default())
    }

    fn acknowledge_sync(
        &self,
        conn: &mut redis::Connection,
        entry_ids: &[String],
    ) -> Result<(), RedisStreamsError> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        let _: u64 = conn
            .xack(&self.stream_key, &self.group, entry_ids)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    /// XACK the entries of every message the endpoint settled since the last pass.
    fn flush_acks(
        &self,
        conn: &mut redis::Connection,
        settled: &mut UnboundedReceiver<Uuid>,
        pending: &mut PendingAcks,
    ) {
        let mut entry_ids = Vec::new();
        while let Ok(message_id) = settled.try_recv() {
            entry_ids.extend(pending.take(message_id));
        }

        if let Err(e) = self.acknowledge_sync(conn, &entry_ids) {
            error!(error = %e, entries = entry_ids.len(), "failed to acknowledge stream entries");
        }
    }

    /// Append due redeliveries back to the stream.
    ///
    /// A member is claimed by removing it from the set, so only one instance
    /// appends it; a failed append puts it back.
    fn promote_due(&self, conn: &mut redis::Connection) -> Result<usize, RedisStreamsError> {
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(&self.redelivery_key, "-inf", now, 0, READ_COUNT as isize)
            .map_err(|e| RedisStreamsError::Command(format!("ZRANGEBYSCORE failed: {e}")))?;

        let mut promoted = 0;
        for member in due {
            let claimed: u64 = conn
                .zrem(&self.redelivery_key, &member)
                .map_err(|e| RedisStreamsError::Command(format!("ZREM failed: {e}")))?;
            if claimed == 0 {
                continue;
            }

            let message: BusMessage = match serde_json::from_str(&member) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "dropping unreadable redelivery");
                    continue;
                }
            };

            if let Err(e) = self.append_sync(conn, &message) {
                let _: redis::RedisResult<u64> = conn.zadd(&self.redelivery_key, &member, now);
                return Err(e);
            }
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Blocking read loop; ends when the subscription is dropped.
    fn pump(&self, sender: &UnboundedSender<BusMessage>, mut settled: UnboundedReceiver<Uuid>) {
        let mut conn = match self.connection() {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "redis subscription could not connect");
                return;
            }
        };

        let mut cursor = ReadCursor::start();
        let mut pending = PendingAcks::default();
        info!(consumer = %self.consumer, "redis subscription started, reading backlog");

        while !sender.is_closed() {
            self.flush_acks(&mut conn, &mut settled, &mut pending);

            match self.promote_due(&mut conn) {
                Ok(0) => {}
                Ok(promoted) => debug!(promoted, "due redeliveries appended to stream"),
                Err(e) => error!(error = %e, "failed to promote due redeliveries"),
            }

            let entries = match self.read_group_sync(&mut conn, &cursor) {
                Ok(entries) => entries,
                Err(e) => {
                    error!(error = %e, "failed to read from stream");
                    std::thread::sleep(Duration::from_millis(500));
                    continue;
                }
            };
            cursor.advance(entries.last().map(|entry| entry.id.as_str()));

            for entry in entries {
                match parse_entry(&entry) {
                    Ok(envelope) => {
                        pending.track(envelope.message_id(), entry.id);
                        if sender.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // Deleted entries come back from the backlog with no fields.
                        warn!(entry_id = %entry.id, error = %e, "dropping unreadable stream entry");
                        if let Err(e) = self.acknowledge_sync(&mut conn, &[entry.id]) {
                            error!(error = %e, "failed to acknowledge unreadable entry");
                        }
                    }
                }
            }
        }

        self.flush_acks(&mut conn, &mut settled, &mut pending);
        debug!(consumer = %self.consumer, unacknowledged = pending.len(), "redis subscription closed");
    }
}

fn parse_entry(entry: &StreamId) -> Result<BusMessage, RedisStreamsError> {
    let raw: String = entry
        .get("envelope")
        .ok_or_else(|| RedisStreamsError::Deserialization("missing envelope field".to_string()))?;

    serde_json::from_str(&raw)
        .map_err(|e| RedisStreamsError::Deserialization(format!("invalid envelope: {e}")))
}

#[async_trait]
impl EventBus<BusMessage> for RedisStreamsEventBus {
    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let bus = self.clone();
        tokio::task::spawn_blocking(move || bus.publish_sync(&message))
            .await
            .map_err(|e| BusError::Transport(format!("publish task failed: {e}")))??;
        Ok(())
    }

    fn subscribe(&self) -> Subscription<BusMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (ack_sender, settled) = mpsc::unbounded_channel();

        if let Err(e) = self.ensure_consumer_group() {
            error!(group = %self.group, error = %e, "failed to create consumer group");
        }

        let bus = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("redis-{}", self.group))
            .spawn(move || bus.pump(&sender, settled));
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn redis subscription thread");
        }

        Subscription::with_acknowledger(receiver, Arc::new(RedisAcknowledger { sender: ack_sender }))
    }
}

/// Stores delayed redeliveries in the endpoint's redelivery set so they
/// survive a restart.
#[derive(Debug, Clone)]
pub struct RedisRedeliveryScheduler {
    client: Arc<redis::Client>,
    key: String,
}

impl RedisRedeliveryScheduler {
    pub fn new(redis_url: impl AsRef<str>, endpoint: &str) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            key: redelivery_key(endpoint),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn schedule_sync(&self, envelope: &BusMessage, due_ms: i64) -> Result<(), RedisStreamsError> {
        let member = serde_json::to_string(envelope)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let _: u64 = conn
            .zadd(&self.key, member, due_ms)
            .map_err(|e| RedisStreamsError::Command(format!("ZADD failed: {e}")))?;
        Ok(())
    }
}

fn due_at_ms(now_ms: i64, delay: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}

#[async_trait]
impl RedeliveryScheduler for RedisRedeliveryScheduler {
    async fn schedule(&self, envelope: BusMessage, delay: Duration) -> Result<(), BusError> {
        let scheduler = self.clone();
        let due_ms = due_at_ms(Utc::now().timestamp_millis(), delay);
        let message_id = envelope.message_id();

        tokio::task::spawn_blocking(move || scheduler.schedule_sync(&envelope, due_ms))
            .await
            .map_err(|e| BusError::Transport(format!("redelivery task failed: {e}")))??;

        debug!(key = %self.key, %message_id, delay_secs = delay.as_secs(), "redelivery stored");
        Ok(())
    }
}

/// Error queue stream `<endpoint>_error`.
#[derive(Debug, Clone)]
pub struct RedisErrorQueue {
    client: Arc<redis::Client>,
    stream_key: String,
}

impl RedisErrorQueue {
    pub fn new(redis_url: impl AsRef<str>, endpoint: &str) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_key: error_queue_name(endpoint),
        })
    }

    fn push_sync(&self, message: &FaultedMessage) -> Result<(), RedisStreamsError> {
        let envelope = serde_json::to_string(&message.envelope)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let _: String = conn
            .xadd(
                &self.stream_key,
                "*",
                &[
                    ("message_id", message.envelope.message_id().to_string()),
                    ("message_type", message.envelope.message_type().to_string()),
                    ("consumer", message.consumer.clone()),
                    ("reason", message.reason.clone()),
                    ("faulted_at", message.faulted_at.to_rfc3339()),
                    ("envelope", envelope),
                ],
            )
            .map_err(|e| RedisStreamsError::Command(format!("error queue XADD failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl ErrorQueue for RedisErrorQueue {
    fn name(&self) -> &str {
        &self.stream_key
    }

    async fn move_to_error(&self, message: FaultedMessage) -> Result<(), BusError> {
        let queue = self.clone();
        let message_id = message.envelope.message_id();
        tokio::task::spawn_blocking(move || queue.push_sync(&message))
            .await
            .map_err(|e| BusError::Transport(format!("error queue task failed: {e}")))??;

        warn!(queue = %self.stream_key, %message_id, "message moved to error queue");
        Ok(())
    }
}
