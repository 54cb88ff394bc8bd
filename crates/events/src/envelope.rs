use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use content_core::AggregateId;

/// Envelope for a message travelling over the bus.
///
/// Notes:
/// - `message_id` is the outbox row id; consumers use it for de-duplication.
/// - `redelivery_count` is 0 on first delivery and grows with each delayed redelivery.
/// - `payload` is the serialized event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<P> {
    message_id: Uuid,
    message_type: String,

    aggregate_id: AggregateId,
    aggregate_type: String,

    occurred_at: DateTime<Utc>,
    #[serde(default)]
    redelivery_count: u32,

    payload: P,
}

impl<P> EventEnvelope<P> {
    pub fn new(
        message_id: Uuid,
        message_type: impl Into<String>,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: P,
    ) -> Self {
        Self {
            message_id,
            message_type: message_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            occurred_at,
            redelivery_count: 0,
            payload,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn redelivery_count(&self) -> u32 {
        self.redelivery_count
    }

    /// Copy of this envelope scheduled for its next delivery attempt.
    pub fn redelivered(&self) -> Self
    where
        P: Clone,
    {
        Self {
            redelivery_count: self.redelivery_count + 1,
            ..self.clone()
        }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}
