//! PostgreSQL schema for the command store, read side, outbox and inbox.

use sqlx::PgPool;
use tracing::{info, instrument};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id UUID PRIMARY KEY,
        title TEXT NOT NULL CHECK (length(btrim(title)) > 0),
        description TEXT NULL,
        parent_id UUID NULL REFERENCES categories (id),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NULL,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
        version BIGINT NOT NULL,
        CONSTRAINT categories_not_own_parent CHECK (parent_id IS NULL OR parent_id <> id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories (parent_id) WHERE is_deleted = FALSE",
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        id UUID PRIMARY KEY,
        category_id UUID NOT NULL REFERENCES categories (id),
        title TEXT NOT NULL CHECK (length(btrim(title)) > 0),
        summary TEXT NULL,
        body TEXT NOT NULL,
        author TEXT NOT NULL,
        comment_count INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NULL,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
        version BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_posts_category ON posts (category_id, created_at DESC) WHERE is_deleted = FALSE",
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id UUID PRIMARY KEY,
        post_id UUID NOT NULL REFERENCES posts (id),
        author_name TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NULL,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
        version BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_post ON comments (post_id, created_at) WHERE is_deleted = FALSE",
    r#"
    CREATE TABLE IF NOT EXISTS outbox_messages (
        sequence BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        message_type TEXT NOT NULL,
        payload JSONB NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        published_at TIMESTAMPTZ NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox_messages (sequence) WHERE published_at IS NULL",
    r#"
    CREATE TABLE IF NOT EXISTS inbox_messages (
        message_id UUID NOT NULL,
        consumer TEXT NOT NULL,
        consumed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (message_id, consumer)
    )
    "#,
];

/// Create tables and indexes if they do not exist yet.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!(statements = STATEMENTS.len(), "database schema ensured");
    Ok(())
}
