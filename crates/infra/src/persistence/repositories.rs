use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use content_categories::{Category, CategoryId};
use content_comments::Comment;
use content_core::{AggregateRoot, Audited, ExpectedVersion};
use content_posts::Post;

use super::unit_of_work::ChangeTracker;
use super::{CommandStore, PersistedAggregate, PersistenceError};

/// Write-side repository for one aggregate type.
///
/// `add` and `update` only stage; nothing is written until the scope's
/// unit of work commits.
#[async_trait]
pub trait CommandRepository<T: PersistedAggregate>: Send + Sync {
    /// Load by id, soft-deleted aggregates included.
    async fn get(&self, id: T::Id) -> Result<Option<T>, PersistenceError>;

    /// Whether a live (not soft-deleted) aggregate exists.
    async fn exists(&self, id: T::Id) -> Result<bool, PersistenceError> {
        Ok(self.get(id).await?.is_some_and(|aggregate| !aggregate.is_deleted()))
    }

    /// Stage a newly created aggregate with the events that created it.
    fn add(&self, aggregate: T, events: &[T::Event]) -> Result<(), PersistenceError>;

    /// Stage a modified aggregate; `events` are the ones applied since it was loaded.
    fn update(&self, aggregate: T, events: &[T::Event]) -> Result<(), PersistenceError>;

    /// Stage a change that raised no events, checked against `loaded_version`.
    fn update_state(&self, aggregate: T, loaded_version: u64) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait CategoryCommandRepository: CommandRepository<Category> {
    /// Whether any live category has `id` as parent.
    async fn is_parent_category(&self, id: CategoryId) -> Result<bool, PersistenceError>;
}

pub trait PostCommandRepository: CommandRepository<Post> {}

pub trait CommentCommandRepository: CommandRepository<Comment> {}

/// `CommandRepository` over a shared `CommandStore` and a scope's tracker.
pub struct StoreRepository<T> {
    store: Arc<dyn CommandStore>,
    tracker: Arc<ChangeTracker>,
    _aggregate: PhantomData<fn() -> T>,
}

impl<T> StoreRepository<T> {
    pub(crate) fn new(store: Arc<dyn CommandStore>, tracker: Arc<ChangeTracker>) -> Self {
        Self {
            store,
            tracker,
            _aggregate: PhantomData,
        }
    }
}

#[async_trait]
impl<T: PersistedAggregate> CommandRepository<T> for StoreRepository<T> {
    async fn get(&self, id: T::Id) -> Result<Option<T>, PersistenceError> {
        T::load(self.store.as_ref(), id).await
    }

    fn add(&self, aggregate: T, events: &[T::Event]) -> Result<(), PersistenceError> {
        aggregate.check_integrity()?;
        self.tracker.stage(aggregate, events, ExpectedVersion::NoAggregate)
    }

    fn update(&self, aggregate: T, events: &[T::Event]) -> Result<(), PersistenceError> {
        aggregate.check_integrity()?;
        let loaded = aggregate.version().saturating_sub(events.len() as u64);
        self.tracker.stage(aggregate, events, ExpectedVersion::Exact(loaded))
    }

    fn update_state(&self, aggregate: T, loaded_version: u64) -> Result<(), PersistenceError> {
        aggregate.check_integrity()?;
        self.tracker.stage(aggregate, &[], ExpectedVersion::Exact(loaded_version))
    }
}

#[async_trait]
impl CategoryCommandRepository for StoreRepository<Category> {
    async fn is_parent_category(&self, id: CategoryId) -> Result<bool, PersistenceError> {
        self.store.has_live_children(id).await
    }
}

impl PostCommandRepository for StoreRepository<Post> {}

impl CommentCommandRepository for StoreRepository<Comment> {}
