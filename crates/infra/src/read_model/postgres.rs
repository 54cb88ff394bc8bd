//! Postgres-backed query repositories.
//!
//! Reads go straight to the committed tables; soft-deleted rows never leave
//! the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use content_categories::CategoryId;
use content_comments::CommentId;
use content_posts::PostId;

use super::{
    CategoryQueryRepository, CategoryQueryResult, CommentQueryRepository, CommentQueryResult,
    GetAllCategoryQuery, GetAllPostQuery, GetPostCommentsQuery, PostDetailsQueryResult,
    PostQueryRepository, PostQueryResult,
};
use crate::db::ExecutionStrategy;
use crate::persistence::PersistenceError;

const POST_COLUMNS: &str = r#"
    p.id, p.category_id, c.title AS category_title, p.title, p.summary, p.author,
    p.comment_count, p.created_at, p.updated_at, p.body
"#;

#[derive(Debug, Clone)]
pub struct PostgresQueryRepository {
    pool: PgPool,
    strategy: ExecutionStrategy,
}

impl PostgresQueryRepository {
    pub fn new(pool: PgPool, strategy: ExecutionStrategy) -> Self {
        Self { pool, strategy }
    }
}

#[derive(Debug, FromRow)]
struct PostRow {
    id: Uuid,
    category_id: Uuid,
    category_title: Option<String>,
    title: String,
    summary: Option<String>,
    author: String,
    comment_count: i32,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    body: String,
}

impl PostRow {
    fn into_details(self) -> PostDetailsQueryResult {
        PostDetailsQueryResult {
            post: PostQueryResult {
                id: PostId::from_uuid(self.id),
                category_id: CategoryId::from_uuid(self.category_id),
                category_title: self.category_title,
                title: self.title,
                summary: self.summary,
                author: self.author,
                comment_count: self.comment_count.max(0) as u32,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            body: self.body,
        }
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
}

impl From<CategoryRow> for CategoryQueryResult {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: CategoryId::from_uuid(row.id),
            title: row.title,
            description: row.description,
            parent_id: row.parent_id.map(CategoryId::from_uuid),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CommentRow {
    id: Uuid,
    post_id: Uuid,
    author_name: String,
    text: String,
    created_at: DateTime<Utc>,
}

impl From<CommentRow> for CommentQueryResult {
    fn from(row: CommentRow) -> Self {
        Self {
            id: CommentId::from_uuid(row.id),
            post_id: PostId::from_uuid(row.post_id),
            author_name: row.author_name,
            text: row.text,
            created_at: row.created_at,
        }
    }
}

/// `%term%` with LIKE wildcards in `term` escaped.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl PostQueryRepository for PostgresQueryRepository {
    #[instrument(skip(self), err)]
    async fn execute(&self, query: &GetAllPostQuery) -> Result<Vec<PostQueryResult>, PersistenceError> {
        let sql = format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts p
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE p.is_deleted = FALSE
              AND ($1::UUID IS NULL OR p.category_id = $1)
              AND ($2::TEXT IS NULL OR p.title ILIKE $2 OR p.summary ILIKE $2)
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT $3 OFFSET $4
            "#
        );
        let category = query.category_id.map(|c| c.as_uuid());
        let search = query.search_term().map(|term| like_pattern(&term));

        let rows = self
            .strategy
            .execute("posts.query", || {
                sqlx::query_as::<_, PostRow>(&sql)
                    .bind(category)
                    .bind(search.as_deref())
                    .bind(query.limit() as i64)
                    .bind(query.offset() as i64)
                    .fetch_all(&self.pool)
            })
            .await?;

        Ok(rows.into_iter().map(|row| row.into_details().post).collect())
    }

    #[instrument(skip(self), fields(post_id = %id), err)]
    async fn find_by_id(&self, id: PostId) -> Result<Option<PostDetailsQueryResult>, PersistenceError> {
        let sql = format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts p
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE p.id = $1 AND p.is_deleted = FALSE
            "#
        );

        let row = self
            .strategy
            .execute("posts.find_by_id", || {
                sqlx::query_as::<_, PostRow>(&sql)
                    .bind(id.as_uuid())
                    .fetch_optional(&self.pool)
            })
            .await?;

        Ok(row.map(PostRow::into_details))
    }
}

#[async_trait]
impl CategoryQueryRepository for PostgresQueryRepository {
    #[instrument(skip(self), err)]
    async fn execute(
        &self,
        query: &GetAllCategoryQuery,
    ) -> Result<Vec<CategoryQueryResult>, PersistenceError> {
        let parent = query.parent_id.map(|p| p.as_uuid());

        let rows = self
            .strategy
            .execute("categories.query", || {
                sqlx::query_as::<_, CategoryRow>(
                    r#"
                    SELECT id, title, description, parent_id, created_at, updated_at
                    FROM categories
                    WHERE is_deleted = FALSE AND ($1::UUID IS NULL OR parent_id = $1)
                    ORDER BY created_at ASC, id ASC
                    "#,
                )
                .bind(parent)
                .fetch_all(&self.pool)
            })
            .await?;

        Ok(rows.into_iter().map(CategoryQueryResult::from).collect())
    }

    #[instrument(skip(self), fields(category_id = %id), err)]
    async fn find_by_id(&self, id: CategoryId) -> Result<Option<CategoryQueryResult>, PersistenceError> {
        let row = self
            .strategy
            .execute("categories.find_by_id", || {
                sqlx::query_as::<_, CategoryRow>(
                    r#"
                    SELECT id, title, description, parent_id, created_at, updated_at
                    FROM categories
                    WHERE id = $1 AND is_deleted = FALSE
                    "#,
                )
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
            })
            .await?;

        Ok(row.map(CategoryQueryResult::from))
    }
}

#[async_trait]
impl CommentQueryRepository for PostgresQueryRepository {
    #[instrument(skip(self), fields(post_id = %query.post_id), err)]
    async fn execute(
        &self,
        query: &GetPostCommentsQuery,
    ) -> Result<Vec<CommentQueryResult>, PersistenceError> {
        let rows = self
            .strategy
            .execute("comments.query", || {
                sqlx::query_as::<_, CommentRow>(
                    r#"
                    SELECT id, post_id, author_name, text, created_at
                    FROM comments
                    WHERE post_id = $1 AND is_deleted = FALSE
                    ORDER BY created_at ASC, id ASC
                    "#,
                )
                .bind(query.post_id.as_uuid())
                .fetch_all(&self.pool)
            })
            .await?;

        Ok(rows.into_iter().map(CommentQueryResult::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("rust"), "%rust%");
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
    }
}
