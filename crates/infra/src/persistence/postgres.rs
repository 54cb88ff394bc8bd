//! Postgres-backed command store.
//!
//! A change set is committed in one transaction; the whole transaction is
//! re-run by the execution strategy on transient failures.
//!
//! | Condition | SQLSTATE | PersistenceError |
//! |-----------|----------|------------------|
//! | stale version (0 rows updated) | n/a | `Conflict` |
//! | duplicate id or inbox record | `23505` | `Conflict` |
//! | missing parent/category/post | `23503` | `Rejected(NotFound)` |
//! | category is its own parent | `23514` | `Rejected(InvariantViolation)` |
//! | anything else | any | `Database` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use content_categories::{Category, CategoryId};
use content_comments::{Comment, CommentId};
use content_core::{AggregateRoot, Audit, Audited, DomainError, ExpectedVersion};
use content_posts::{Post, PostId, PostState};

use super::{AggregateWrite, ChangeSet, CommandStore, InboxRecord, PersistenceError, StagedWrite};
use crate::db::ExecutionStrategy;
use crate::outbox::OutboxMessage;

#[derive(Debug, Clone)]
pub struct PostgresCommandStore {
    pool: PgPool,
    strategy: ExecutionStrategy,
}

impl PostgresCommandStore {
    pub fn new(pool: PgPool, strategy: ExecutionStrategy) -> Self {
        Self { pool, strategy }
    }

    async fn commit_once(&self, changes: &ChangeSet) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for staged in &changes.writes {
            write_aggregate(&mut tx, staged).await?;
        }
        for message in &changes.outbox {
            insert_outbox(&mut tx, message).await?;
        }
        for record in &changes.inbox {
            insert_inbox(&mut tx, record).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }
}

#[derive(Debug, FromRow)]
struct CategoryRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    parent_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    version: i64,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category::rehydrate(
            CategoryId::from_uuid(row.id),
            row.title,
            row.description,
            row.parent_id.map(CategoryId::from_uuid),
            audit(row.created_at, row.updated_at, row.is_deleted),
            row.version.max(0) as u64,
        )
    }
}

#[derive(Debug, FromRow)]
struct PostRow {
    id: Uuid,
    category_id: Uuid,
    title: String,
    summary: Option<String>,
    body: String,
    author: String,
    comment_count: i32,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    version: i64,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post::rehydrate(PostState {
            id: PostId::from_uuid(row.id),
            category_id: CategoryId::from_uuid(row.category_id),
            title: row.title,
            summary: row.summary,
            body: row.body,
            author: row.author,
            comment_count: row.comment_count.max(0) as u32,
            audit: audit(row.created_at, row.updated_at, row.is_deleted),
            version: row.version.max(0) as u64,
        })
    }
}

#[derive(Debug, FromRow)]
struct CommentRow {
    id: Uuid,
    post_id: Uuid,
    author_name: String,
    text: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    version: i64,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment::rehydrate(
            CommentId::from_uuid(row.id),
            PostId::from_uuid(row.post_id),
            row.author_name,
            row.text,
            audit(row.created_at, row.updated_at, row.is_deleted),
            row.version.max(0) as u64,
        )
    }
}

fn audit(created_at: DateTime<Utc>, updated_at: Option<DateTime<Utc>>, is_deleted: bool) -> Audit {
    Audit {
        created_at,
        updated_at,
        is_deleted,
    }
}

fn map_sqlx_error(err: sqlx::Error) -> PersistenceError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("23505") => {
                return PersistenceError::Conflict(db.message().to_string());
            }
            Some("23503") => {
                let key = match db.constraint() {
                    Some("comments_post_id_fkey") => "post.not_found",
                    _ => "category.not_found",
                };
                return PersistenceError::Rejected(DomainError::not_found(key));
            }
            Some("23514") if db.constraint() == Some("categories_not_own_parent") => {
                return PersistenceError::Rejected(DomainError::invariant("category.self_parent"));
            }
            _ => {}
        }
    }
    PersistenceError::Database(err)
}

/// `Exact(v)` and `Any` update in place; `NoAggregate` inserts.
fn expected_for_update(expected: ExpectedVersion) -> Option<Option<i64>> {
    match expected {
        ExpectedVersion::NoAggregate => None,
        ExpectedVersion::Exact(v) => Some(Some(v as i64)),
        ExpectedVersion::Any => Some(None),
    }
}

async fn write_aggregate(
    tx: &mut Transaction<'_, Postgres>,
    staged: &StagedWrite,
) -> Result<(), PersistenceError> {
    let update = expected_for_update(staged.expected);

    let result = match (&staged.write, update) {
        (AggregateWrite::Category(c), None) => sqlx::query(
            r#"
            INSERT INTO categories (id, title, description, parent_id, created_at, updated_at, is_deleted, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(c.id_typed().as_uuid())
        .bind(c.title())
        .bind(c.description())
        .bind(c.parent_id().map(|p| p.as_uuid()))
        .bind(c.audit().created_at)
        .bind(c.audit().updated_at)
        .bind(c.is_deleted())
        .bind(c.version() as i64)
        .execute(&mut **tx)
        .await,
        (AggregateWrite::Category(c), Some(expected)) => sqlx::query(
            r#"
            UPDATE categories
            SET title = $2, description = $3, parent_id = $4, updated_at = $5, is_deleted = $6, version = $7
            WHERE id = $1 AND ($8::BIGINT IS NULL OR version = $8)
            "#,
        )
        .bind(c.id_typed().as_uuid())
        .bind(c.title())
        .bind(c.description())
        .bind(c.parent_id().map(|p| p.as_uuid()))
        .bind(c.audit().updated_at)
        .bind(c.is_deleted())
        .bind(c.version() as i64)
        .bind(expected)
        .execute(&mut **tx)
        .await,
        (AggregateWrite::Post(p), None) => sqlx::query(
            r#"
            INSERT INTO posts (id, category_id, title, summary, body, author, comment_count,
                               created_at, updated_at, is_deleted, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(p.id_typed().as_uuid())
        .bind(p.category_id().as_uuid())
        .bind(p.title())
        .bind(p.summary())
        .bind(p.body())
        .bind(p.author())
        .bind(p.comment_count() as i32)
        .bind(p.audit().created_at)
        .bind(p.audit().updated_at)
        .bind(p.is_deleted())
        .bind(p.version() as i64)
        .execute(&mut **tx)
        .await,
        (AggregateWrite::Post(p), Some(expected)) => sqlx::query(
            r#"
            UPDATE posts
            SET category_id = $2, title = $3, summary = $4, body = $5, comment_count = $6,
                updated_at = $7, is_deleted = $8, version = $9
            WHERE id = $1 AND ($10::BIGINT IS NULL OR version = $10)
            "#,
        )
        .bind(p.id_typed().as_uuid())
        .bind(p.category_id().as_uuid())
        .bind(p.title())
        .bind(p.summary())
        .bind(p.body())
        .bind(p.comment_count() as i32)
        .bind(p.audit().updated_at)
        .bind(p.is_deleted())
        .bind(p.version() as i64)
        .bind(expected)
        .execute(&mut **tx)
        .await,
        (AggregateWrite::Comment(c), None) => sqlx::query(
            r#"
            INSERT INTO comments (id, post_id, author_name, text, created_at, updated_at, is_deleted, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(c.id_typed().as_uuid())
        .bind(c.post_id().as_uuid())
        .bind(c.author_name())
        .bind(c.text())
        .bind(c.audit().created_at)
        .bind(c.audit().updated_at)
        .bind(c.is_deleted())
        .bind(c.version() as i64)
        .execute(&mut **tx)
        .await,
        (AggregateWrite::Comment(c), Some(expected)) => sqlx::query(
            r#"
            UPDATE comments
            SET author_name = $2, text = $3, updated_at = $4, is_deleted = $5, version = $6
            WHERE id = $1 AND ($7::BIGINT IS NULL OR version = $7)
            "#,
        )
        .bind(c.id_typed().as_uuid())
        .bind(c.author_name())
        .bind(c.text())
        .bind(c.audit().updated_at)
        .bind(c.is_deleted())
        .bind(c.version() as i64)
        .bind(expected)
        .execute(&mut **tx)
        .await,
    }
    .map_err(map_sqlx_error)?;

    if result.rows_affected() == 0 {
        return Err(PersistenceError::Conflict(format!(
            "{} {} expected {:?}",
            staged.write.aggregate_type(),
            staged.write.aggregate_id(),
            staged.expected
        )));
    }
    Ok(())
}

async fn insert_outbox(
    tx: &mut Transaction<'_, Postgres>,
    message: &OutboxMessage,
) -> Result<(), PersistenceError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (id, aggregate_type, aggregate_id, message_type, payload, occurred_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(message.id)
    .bind(&message.aggregate_type)
    .bind(message.aggregate_id.as_uuid())
    .bind(&message.message_type)
    .bind(&message.payload)
    .bind(message.occurred_at)
    .bind(message.created_at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn insert_inbox(
    tx: &mut Transaction<'_, Postgres>,
    record: &InboxRecord,
) -> Result<(), PersistenceError> {
    sqlx::query("INSERT INTO inbox_messages (message_id, consumer) VALUES ($1, $2)")
        .bind(record.message_id)
        .bind(&record.consumer)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

#[async_trait]
impl CommandStore for PostgresCommandStore {
    #[instrument(skip(self), fields(category_id = %id), err)]
    async fn load_category(&self, id: CategoryId) -> Result<Option<Category>, PersistenceError> {
        let row = self
            .strategy
            .execute("categories.load", || {
                sqlx::query_as::<_, CategoryRow>(
                    r#"
                    SELECT id, title, description, parent_id, created_at, updated_at, is_deleted, version
                    FROM categories WHERE id = $1
                    "#,
                )
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
            })
            .await?;
        Ok(row.map(Category::from))
    }

    #[instrument(skip(self), fields(post_id = %id), err)]
    async fn load_post(&self, id: PostId) -> Result<Option<Post>, PersistenceError> {
        let row = self
            .strategy
            .execute("posts.load", || {
                sqlx::query_as::<_, PostRow>(
                    r#"
                    SELECT id, category_id, title, summary, body, author, comment_count,
                           created_at, updated_at, is_deleted, version
                    FROM posts WHERE id = $1
                    "#,
                )
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
            })
            .await?;
        Ok(row.map(Post::from))
    }

    #[instrument(skip(self), fields(comment_id = %id), err)]
    async fn load_comment(&self, id: CommentId) -> Result<Option<Comment>, PersistenceError> {
        let row = self
            .strategy
            .execute("comments.load", || {
                sqlx::query_as::<_, CommentRow>(
                    r#"
                    SELECT id, post_id, author_name, text, created_at, updated_at, is_deleted, version
                    FROM comments WHERE id = $1
                    "#,
                )
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
            })
            .await?;
        Ok(row.map(Comment::from))
    }

    #[instrument(skip(self), fields(category_id = %id), err)]
    async fn has_live_children(&self, id: CategoryId) -> Result<bool, PersistenceError> {
        let exists: bool = self
            .strategy
            .execute("categories.has_live_children", || {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM categories WHERE parent_id = $1 AND is_deleted = FALSE)",
                )
                .bind(id.as_uuid())
                .fetch_one(&self.pool)
            })
            .await?;
        Ok(exists)
    }

    #[instrument(skip(self), err)]
    async fn has_consumed(&self, message_id: Uuid, consumer: &str) -> Result<bool, PersistenceError> {
        let exists: bool = self
            .strategy
            .execute("inbox.has_consumed", || {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM inbox_messages WHERE message_id = $1 AND consumer = $2)",
                )
                .bind(message_id)
                .bind(consumer)
                .fetch_one(&self.pool)
            })
            .await?;
        Ok(exists)
    }

    #[instrument(
        skip(self, changes),
        fields(
            writes = changes.writes.len(),
            outbox = changes.outbox.len(),
            inbox = changes.inbox.len(),
            committed = tracing::field::Empty
        ),
        err
    )]
    async fn commit(&self, changes: ChangeSet) -> Result<(), PersistenceError> {
        self.strategy
            .execute("unit_of_work.commit", || self.commit_once(&changes))
            .await?;
        Span::current().record("committed", true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use content_categories::{CategoryCommand, CreateCategory};
    use content_events::execute;

    use crate::db::ensure_schema;
    use crate::persistence::{CommandRepository, CommandScope};

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
        let pool = PgPool::connect(&url).await.expect("connect");
        ensure_schema(&pool).await.expect("schema");
        pool
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn commit_round_trips_and_detects_stale_versions() {
        let store = std::sync::Arc::new(PostgresCommandStore::new(pool().await, ExecutionStrategy::default()));
        let id = CategoryId::new();

        let scope = CommandScope::new(store.clone());
        let mut category = Category::empty(id);
        let events = execute(
            &mut category,
            &CategoryCommand::CreateCategory(CreateCategory {
                category_id: id,
                title: "Databases".to_string(),
                description: Some("Storage engines".to_string()),
                parent_id: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        scope.categories().add(category.clone(), &events).unwrap();
        scope.unit_of_work().commit().await.unwrap();

        let loaded = store.load_category(id).await.unwrap().unwrap();
        assert_eq!(loaded.title(), "Databases");
        assert_eq!(loaded.version(), 1);

        // Re-adding the same id is a duplicate key.
        let again = CommandScope::new(store.clone());
        again.categories().add(category, &events).unwrap();
        let err = again.unit_of_work().commit().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict(_)));
    }

    #[test]
    fn no_aggregate_inserts_and_the_rest_update() {
        assert_eq!(expected_for_update(ExpectedVersion::NoAggregate), None);
        assert_eq!(expected_for_update(ExpectedVersion::Exact(3)), Some(Some(3)));
        assert_eq!(expected_for_update(ExpectedVersion::Any), Some(None));
    }
}
