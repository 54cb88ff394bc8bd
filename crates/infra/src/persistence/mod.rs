//! Write side: command store, repositories and the unit of work.
//!
//! ```text
//! handler → CommandScope ─┬─ repositories (load aggregates, stage writes + events)
//!                         └─ UnitOfWork::commit → CommandStore::commit(ChangeSet)
//!                                                   (state rows + outbox rows + inbox rows, one transaction)
//! ```

pub mod in_memory;
pub mod postgres;
pub mod repositories;
pub mod unit_of_work;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use content_categories::{Category, CategoryId};
use content_comments::{Comment, CommentId};
use content_core::{Aggregate, AggregateId, AggregateRoot, Audited, DomainError, ExpectedVersion};
use content_posts::{Post, PostId};

use crate::db::Transient;
use crate::outbox::OutboxMessage;

pub use in_memory::InMemoryContentStore;
pub use postgres::PostgresCommandStore;
pub use repositories::{
    CategoryCommandRepository, CommandRepository, CommentCommandRepository, PostCommandRepository,
    StoreRepository,
};
pub use unit_of_work::{ChangeTracker, CommandScope, CommitSummary, UnitOfWork};

/// Persistence operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors, except `Rejected`, which carries a domain rule enforced at
/// the persistence boundary.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("rejected: {0}")]
    Rejected(#[from] DomainError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl Transient for PersistenceError {
    fn is_transient(&self) -> bool {
        match self {
            PersistenceError::Database(e) => e.is_transient(),
            PersistenceError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// A consumed message id recorded with the consumer's own changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InboxRecord {
    pub message_id: Uuid,
    pub consumer: String,
}

/// New state of one aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateWrite {
    Category(Category),
    Post(Post),
    Comment(Comment),
}

impl AggregateWrite {
    pub fn aggregate_type(&self) -> &'static str {
        match self {
            AggregateWrite::Category(_) => Category::AGGREGATE_TYPE,
            AggregateWrite::Post(_) => Post::AGGREGATE_TYPE,
            AggregateWrite::Comment(_) => Comment::AGGREGATE_TYPE,
        }
    }

    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            AggregateWrite::Category(c) => c.aggregate_id(),
            AggregateWrite::Post(p) => p.aggregate_id(),
            AggregateWrite::Comment(c) => c.aggregate_id(),
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            AggregateWrite::Category(c) => c.version(),
            AggregateWrite::Post(p) => p.version(),
            AggregateWrite::Comment(c) => c.version(),
        }
    }

    pub fn check_integrity(&self) -> Result<(), DomainError> {
        match self {
            AggregateWrite::Category(c) => c.check_integrity(),
            AggregateWrite::Post(p) => p.check_integrity(),
            AggregateWrite::Comment(c) => c.check_integrity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedWrite {
    pub write: AggregateWrite,
    /// Version the stored row must have for the write to apply.
    pub expected: ExpectedVersion,
}

/// Everything one unit of work commits atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub writes: Vec<StagedWrite>,
    pub outbox: Vec<OutboxMessage>,
    pub inbox: Vec<InboxRecord>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.outbox.is_empty() && self.inbox.is_empty()
    }
}

/// The write context.
///
/// `load_*` return soft-deleted aggregates too; aggregate rules decide what
/// may happen to them. `commit` applies a change set all-or-nothing: a
/// version mismatch, integrity failure or duplicate inbox record leaves
/// nothing written.
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn load_category(&self, id: CategoryId) -> Result<Option<Category>, PersistenceError>;

    async fn load_post(&self, id: PostId) -> Result<Option<Post>, PersistenceError>;

    async fn load_comment(&self, id: CommentId) -> Result<Option<Comment>, PersistenceError>;

    /// Whether any live category has `id` as its parent.
    async fn has_live_children(&self, id: CategoryId) -> Result<bool, PersistenceError>;

    async fn has_consumed(&self, message_id: Uuid, consumer: &str) -> Result<bool, PersistenceError>;

    async fn commit(&self, changes: ChangeSet) -> Result<(), PersistenceError>;
}

/// Aggregates the command store knows how to load and persist.
#[async_trait]
pub trait PersistedAggregate:
    Aggregate<Error = DomainError, Event: content_events::Event + Serialize>
    + AggregateRoot<Id: Copy + Send + Sync + core::fmt::Display>
    + Audited
    + Clone
    + Send
    + Sync
    + Sized
    + 'static
{
    const AGGREGATE_TYPE: &'static str;

    fn aggregate_id(&self) -> AggregateId;

    fn into_write(self) -> AggregateWrite;

    /// Relational rules checked before a write is staged and again at commit.
    fn check_integrity(&self) -> Result<(), DomainError> {
        Ok(())
    }

    async fn load(store: &dyn CommandStore, id: Self::Id) -> Result<Option<Self>, PersistenceError>;
}

#[async_trait]
impl PersistedAggregate for Category {
    const AGGREGATE_TYPE: &'static str = "content.category";

    fn aggregate_id(&self) -> AggregateId {
        self.id_typed().0
    }

    fn into_write(self) -> AggregateWrite {
        AggregateWrite::Category(self)
    }

    fn check_integrity(&self) -> Result<(), DomainError> {
        if self.is_own_parent() {
            return Err(DomainError::invariant("category.self_parent"));
        }
        Ok(())
    }

    async fn load(store: &dyn CommandStore, id: CategoryId) -> Result<Option<Self>, PersistenceError> {
        store.load_category(id).await
    }
}

#[async_trait]
impl PersistedAggregate for Post {
    const AGGREGATE_TYPE: &'static str = "content.post";

    fn aggregate_id(&self) -> AggregateId {
        self.id_typed().0
    }

    fn into_write(self) -> AggregateWrite {
        AggregateWrite::Post(self)
    }

    async fn load(store: &dyn CommandStore, id: PostId) -> Result<Option<Self>, PersistenceError> {
        store.load_post(id).await
    }
}

#[async_trait]
impl PersistedAggregate for Comment {
    const AGGREGATE_TYPE: &'static str = "content.comment";

    fn aggregate_id(&self) -> AggregateId {
        self.id_typed().0
    }

    fn into_write(self) -> AggregateWrite {
        AggregateWrite::Comment(self)
    }

    async fn load(store: &dyn CommandStore, id: CommentId) -> Result<Option<Self>, PersistenceError> {
        store.load_comment(id).await
    }
}
