//! Read side: query objects, result shapes and query repositories.
//!
//! Query repositories never see the command context's change tracking; they
//! read committed rows only and exclude soft-deleted ones.

pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use content_categories::CategoryId;
use content_comments::CommentId;
use content_posts::PostId;

use crate::persistence::PersistenceError;

pub use postgres::PostgresQueryRepository;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// All live posts, newest first, optionally filtered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllPostQuery {
    pub category_id: Option<CategoryId>,
    /// Case-insensitive match against title and summary.
    pub search: Option<String>,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl Default for GetAllPostQuery {
    fn default() -> Self {
        Self {
            category_id: None,
            search: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl GetAllPostQuery {
    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn limit(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE) as usize
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit()
    }

    /// Lower-cased, trimmed search term; `None` when blank.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostQueryResult {
    pub id: PostId,
    pub category_id: CategoryId,
    pub category_title: Option<String>,
    pub title: String,
    pub summary: Option<String>,
    pub author: String,
    pub comment_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Single post including its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDetailsQueryResult {
    #[serde(flatten)]
    pub post: PostQueryResult,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllCategoryQuery {
    /// Only direct children of this category.
    pub parent_id: Option<CategoryId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryQueryResult {
    pub id: CategoryId,
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Live comments of one post, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPostCommentsQuery {
    pub post_id: PostId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentQueryResult {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PostQueryRepository: Send + Sync {
    async fn execute(&self, query: &GetAllPostQuery) -> Result<Vec<PostQueryResult>, PersistenceError>;

    async fn find_by_id(&self, id: PostId) -> Result<Option<PostDetailsQueryResult>, PersistenceError>;
}

#[async_trait]
pub trait CategoryQueryRepository: Send + Sync {
    async fn execute(
        &self,
        query: &GetAllCategoryQuery,
    ) -> Result<Vec<CategoryQueryResult>, PersistenceError>;

    async fn find_by_id(&self, id: CategoryId) -> Result<Option<CategoryQueryResult>, PersistenceError>;
}

#[async_trait]
pub trait CommentQueryRepository: Send + Sync {
    async fn execute(
        &self,
        query: &GetPostCommentsQuery,
    ) -> Result<Vec<CommentQueryResult>, PersistenceError>;
}

/// The read context handed to query handlers.
#[derive(Clone)]
pub struct QueryRepositories {
    pub posts: Arc<dyn PostQueryRepository>,
    pub categories: Arc<dyn CategoryQueryRepository>,
    pub comments: Arc<dyn CommentQueryRepository>,
}

impl QueryRepositories {
    /// Use one backend for every query repository.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: PostQueryRepository + CategoryQueryRepository + CommentQueryRepository + 'static,
    {
        Self {
            posts: backend.clone(),
            categories: backend.clone(),
            comments: backend,
        }
    }
}
