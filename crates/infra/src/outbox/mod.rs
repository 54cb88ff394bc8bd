//! Transactional outbox: rows written with the business change, published later.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use content_core::AggregateId;
use content_events::{Event, EventEnvelope};

use crate::persistence::PersistenceError;

pub use postgres::PostgresOutboxStore;

/// One domain event waiting for (or done with) publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Also the bus message id.
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub message_type: String,
    pub payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl OutboxMessage {
    pub fn from_event<E>(
        aggregate_type: &str,
        aggregate_id: AggregateId,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        Ok(Self {
            id: Uuid::now_v7(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            message_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            occurred_at: event.occurred_at(),
            created_at: Utc::now(),
            published_at: None,
            attempts: 0,
            last_error: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.published_at.is_none()
    }

    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.id,
            self.message_type.clone(),
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Rows removed by one retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeReport {
    pub outbox: u64,
    pub inbox: u64,
}

/// Read/update side of the outbox used by the dispatcher.
///
/// Rows are only ever appended by a command store commit.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest unpublished messages first.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, PersistenceError>;

    async fn mark_published(
        &self,
        ids: &[Uuid],
        published_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), PersistenceError>;

    /// Delete rows published, and inbox records consumed, at or before `cutoff`.
    /// Pending rows are never removed.
    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport, PersistenceError>;
}
