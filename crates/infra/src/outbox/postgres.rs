//! Postgres-backed outbox reads and status updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use content_core::AggregateId;

use super::{OutboxMessage, OutboxStore, PurgeReport};
use crate::db::ExecutionStrategy;
use crate::persistence::PersistenceError;

#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
    strategy: ExecutionStrategy,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool, strategy: ExecutionStrategy) -> Self {
        Self { pool, strategy }
    }
}

#[derive(Debug, FromRow)]
struct OutboxRow {
    id: Uuid,
    aggregate_type: String,
    aggregate_id: Uuid,
    message_type: String,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    attempts: i32,
    last_error: Option<String>,
}

impl From<OutboxRow> for OutboxMessage {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            aggregate_type: row.aggregate_type,
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            message_type: row.message_type,
            payload: row.payload,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
            published_at: row.published_at,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
        }
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self), err)]
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let rows = self
            .strategy
            .execute("outbox.fetch_pending", || {
                sqlx::query_as::<_, OutboxRow>(
                    r#"
                    SELECT id, aggregate_type, aggregate_id, message_type, payload,
                           occurred_at, created_at, published_at, attempts, last_error
                    FROM outbox_messages
                    WHERE published_at IS NULL
                    ORDER BY sequence ASC
                    LIMIT $1
                    "#,
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
            })
            .await?;

        Ok(rows.into_iter().map(OutboxMessage::from).collect())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn mark_published(
        &self,
        ids: &[Uuid],
        published_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        if ids.is_empty() {
            return Ok(());
        }

        self.strategy
            .execute("outbox.mark_published", || {
                sqlx::query(
                    r#"
                    UPDATE outbox_messages
                    SET published_at = $2
                    WHERE id = ANY($1) AND published_at IS NULL
                    "#,
                )
                .bind(ids)
                .bind(published_at)
                .execute(&self.pool)
            })
            .await?;

        Ok(())
    }

    #[instrument(skip(self, error), err)]
    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), PersistenceError> {
        self.strategy
            .execute("outbox.record_failure", || {
                sqlx::query(
                    r#"
                    UPDATE outbox_messages
                    SET attempts = attempts + 1, last_error = $2
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(error)
                .execute(&self.pool)
            })
            .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport, PersistenceError> {
        let outbox = self
            .strategy
            .execute("outbox.purge", || {
                sqlx::query(
                    "DELETE FROM outbox_messages WHERE published_at IS NOT NULL AND published_at <= $1",
                )
                .bind(cutoff)
                .execute(&self.pool)
            })
            .await?
            .rows_affected();

        let inbox = self
            .strategy
            .execute("inbox.purge", || {
                sqlx::query("DELETE FROM inbox_messages WHERE consumed_at <= $1")
                    .bind(cutoff)
                    .execute(&self.pool)
            })
            .await?
            .rows_affected();

        Ok(PurgeReport { outbox, inbox })
    }
}
