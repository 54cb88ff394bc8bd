//! In-memory content store (dev/test).
//!
//! Command store, outbox and query repositories share one set of tables, so
//! a committed change is immediately visible to queries and to the outbox
//! dispatcher.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use content_categories::{Category, CategoryId};
use content_comments::{Comment, CommentId};
use content_core::{AggregateRoot, Audited, DomainError};
use content_posts::{Post, PostId};

use super::{AggregateWrite, ChangeSet, CommandStore, PersistenceError};
use crate::outbox::{OutboxMessage, OutboxStore, PurgeReport};
use crate::read_model::{
    CategoryQueryRepository, CategoryQueryResult, CommentQueryRepository, CommentQueryResult,
    GetAllCategoryQuery, GetAllPostQuery, GetPostCommentsQuery, PostDetailsQueryResult,
    PostQueryRepository, PostQueryResult,
};

#[derive(Debug, Default)]
struct Tables {
    categories: HashMap<CategoryId, Category>,
    posts: HashMap<PostId, Post>,
    comments: HashMap<CommentId, Comment>,
    outbox: Vec<OutboxMessage>,
    /// (message id, consumer) -> consumed at.
    inbox: HashMap<(Uuid, String), DateTime<Utc>>,
}

impl Tables {
    fn stored_version(&self, write: &AggregateWrite) -> Option<u64> {
        match write {
            AggregateWrite::Category(c) => self.categories.get(&c.id_typed()).map(|s| s.version()),
            AggregateWrite::Post(p) => self.posts.get(&p.id_typed()).map(|s| s.version()),
            AggregateWrite::Comment(c) => self.comments.get(&c.id_typed()).map(|s| s.version()),
        }
    }

    /// Referenced rows must exist, either stored or written by the same change set.
    fn check_references(&self, write: &AggregateWrite, changes: &ChangeSet) -> Result<(), DomainError> {
        match write {
            AggregateWrite::Category(c) => match c.parent_id() {
                Some(parent) if !self.has_category(parent, changes) => {
                    Err(DomainError::not_found("category.not_found"))
                }
                _ => Ok(()),
            },
            AggregateWrite::Post(p) if !self.has_category(p.category_id(), changes) => {
                Err(DomainError::not_found("category.not_found"))
            }
            AggregateWrite::Comment(c) if !self.has_post(c.post_id(), changes) => {
                Err(DomainError::not_found("post.not_found"))
            }
            _ => Ok(()),
        }
    }

    fn has_category(&self, id: CategoryId, changes: &ChangeSet) -> bool {
        self.categories.contains_key(&id)
            || changes
                .writes
                .iter()
                .any(|s| matches!(&s.write, AggregateWrite::Category(c) if c.id_typed() == id))
    }

    fn has_post(&self, id: PostId, changes: &ChangeSet) -> bool {
        self.posts.contains_key(&id)
            || changes
                .writes
                .iter()
                .any(|s| matches!(&s.write, AggregateWrite::Post(p) if p.id_typed() == id))
    }

    fn post_result(&self, post: &Post) -> PostQueryResult {
        PostQueryResult {
            id: post.id_typed(),
            category_id: post.category_id(),
            category_title: self
                .categories
                .get(&post.category_id())
                .map(|c| c.title().to_string()),
            title: post.title().to_string(),
            summary: post.summary().map(str::to_string),
            author: post.author().to_string(),
            comment_count: post.comment_count(),
            created_at: post.audit().created_at,
            updated_at: post.audit().updated_at,
        }
    }
}

fn category_result(category: &Category) -> CategoryQueryResult {
    CategoryQueryResult {
        id: category.id_typed(),
        title: category.title().to_string(),
        description: category.description().map(str::to_string),
        parent_id: category.parent_id(),
        created_at: category.audit().created_at,
        updated_at: category.audit().updated_at,
    }
}

#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    tables: RwLock<Tables>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every outbox message still retained, in commit order.
    pub fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.read().outbox.clone()
    }
}

#[async_trait]
impl CommandStore for InMemoryContentStore {
    async fn load_category(&self, id: CategoryId) -> Result<Option<Category>, PersistenceError> {
        Ok(self.read().categories.get(&id).cloned())
    }

    async fn load_post(&self, id: PostId) -> Result<Option<Post>, PersistenceError> {
        Ok(self.read().posts.get(&id).cloned())
    }

    async fn load_comment(&self, id: CommentId) -> Result<Option<Comment>, PersistenceError> {
        Ok(self.read().comments.get(&id).cloned())
    }

    async fn has_live_children(&self, id: CategoryId) -> Result<bool, PersistenceError> {
        Ok(self
            .read()
            .categories
            .values()
            .any(|c| c.parent_id() == Some(id) && !c.is_deleted()))
    }

    async fn has_consumed(&self, message_id: Uuid, consumer: &str) -> Result<bool, PersistenceError> {
        Ok(self.read().inbox.contains_key(&(message_id, consumer.to_string())))
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), PersistenceError> {
        let mut tables = self.write();

        // Validate the whole set before touching any table.
        for staged in &changes.writes {
            let stored = tables.stored_version(&staged.write);
            if !staged.expected.matches(stored) {
                return Err(PersistenceError::Conflict(format!(
                    "{} {} expected {:?}, stored {:?}",
                    staged.write.aggregate_type(),
                    staged.write.aggregate_id(),
                    staged.expected,
                    stored
                )));
            }
            staged.write.check_integrity()?;
            tables.check_references(&staged.write, &changes)?;
        }

        let mut seen = HashSet::new();
        for record in &changes.inbox {
            let key = (record.message_id, record.consumer.clone());
            if tables.inbox.contains_key(&key) || !seen.insert(key) {
                return Err(PersistenceError::Conflict(format!(
                    "message {} already consumed by {}",
                    record.message_id, record.consumer
                )));
            }
        }

        for staged in changes.writes {
            match staged.write {
                AggregateWrite::Category(c) => {
                    tables.categories.insert(c.id_typed(), c);
                }
                AggregateWrite::Post(p) => {
                    tables.posts.insert(p.id_typed(), p);
                }
                AggregateWrite::Comment(c) => {
                    tables.comments.insert(c.id_typed(), c);
                }
            }
        }
        tables.outbox.extend(changes.outbox);
        let consumed_at = Utc::now();
        tables
            .inbox
            .extend(changes.inbox.into_iter().map(|r| ((r.message_id, r.consumer), consumed_at)));

        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryContentStore {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, PersistenceError> {
        Ok(self
            .read()
            .outbox
            .iter()
            .filter(|m| m.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(
        &self,
        ids: &[Uuid],
        published_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut tables = self.write();
        for message in tables.outbox.iter_mut() {
            if message.is_pending() && ids.contains(&message.id) {
                message.published_at = Some(published_at);
            }
        }
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), PersistenceError> {
        let mut tables = self.write();
        if let Some(message) = tables.outbox.iter_mut().find(|m| m.id == id) {
            message.attempts += 1;
            message.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport, PersistenceError> {
        let mut tables = self.write();

        let before = tables.outbox.len();
        tables
            .outbox
            .retain(|m| m.published_at.map_or(true, |published| published > cutoff));
        let outbox = (before - tables.outbox.len()) as u64;

        let before = tables.inbox.len();
        tables.inbox.retain(|_, consumed_at| *consumed_at > cutoff);
        let inbox = (before - tables.inbox.len()) as u64;

        Ok(PurgeReport { outbox, inbox })
    }
}

#[async_trait]
impl PostQueryRepository for InMemoryContentStore {
    async fn execute(&self, query: &GetAllPostQuery) -> Result<Vec<PostQueryResult>, PersistenceError> {
        let tables = self.read();
        let search = query.search_term();

        let mut posts: Vec<&Post> = tables
            .posts
            .values()
            .filter(|p| !p.is_deleted())
            .filter(|p| query.category_id.is_none_or(|c| p.category_id() == c))
            .filter(|p| match &search {
                Some(term) => {
                    p.title().to_lowercase().contains(term)
                        || p.summary().is_some_and(|s| s.to_lowercase().contains(term))
                }
                None => true,
            })
            .collect();
        posts.sort_by(|a, b| {
            b.audit()
                .created_at
                .cmp(&a.audit().created_at)
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });

        Ok(posts
            .into_iter()
            .skip(query.offset())
            .take(query.limit())
            .map(|p| tables.post_result(p))
            .collect())
    }

    async fn find_by_id(&self, id: PostId) -> Result<Option<PostDetailsQueryResult>, PersistenceError> {
        let tables = self.read();
        Ok(tables
            .posts
            .get(&id)
            .filter(|p| !p.is_deleted())
            .map(|p| PostDetailsQueryResult {
                post: tables.post_result(p),
                body: p.body().to_string(),
            }))
    }
}

#[async_trait]
impl CategoryQueryRepository for InMemoryContentStore {
    async fn execute(
        &self,
        query: &GetAllCategoryQuery,
    ) -> Result<Vec<CategoryQueryResult>, PersistenceError> {
        let tables = self.read();
        let mut categories: Vec<&Category> = tables
            .categories
            .values()
            .filter(|c| !c.is_deleted())
            .filter(|c| query.parent_id.is_none_or(|parent| c.parent_id() == Some(parent)))
            .collect();
        categories.sort_by_key(|c| (c.audit().created_at, c.id_typed()));

        Ok(categories.into_iter().map(category_result).collect())
    }

    async fn find_by_id(&self, id: CategoryId) -> Result<Option<CategoryQueryResult>, PersistenceError> {
        Ok(self
            .read()
            .categories
            .get(&id)
            .filter(|c| !c.is_deleted())
            .map(category_result))
    }
}

#[async_trait]
impl CommentQueryRepository for InMemoryContentStore {
    async fn execute(
        &self,
        query: &GetPostCommentsQuery,
    ) -> Result<Vec<CommentQueryResult>, PersistenceError> {
        let tables = self.read();
        let mut comments: Vec<&Comment> = tables
            .comments
            .values()
            .filter(|c| c.post_id() == query.post_id && !c.is_deleted())
            .collect();
        comments.sort_by_key(|c| (c.audit().created_at, c.id_typed()));

        Ok(comments
            .into_iter()
            .map(|c| CommentQueryResult {
                id: c.id_typed(),
                post_id: c.post_id(),
                author_name: c.author_name().to_string(),
                text: c.text().to_string(),
                created_at: c.audit().created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use content_categories::{CategoryCommand, CreateCategory, UpdateCategory};
    use content_core::{Audit, ExpectedVersion};
    use content_events::execute;
    use content_posts::{CreatePost, PostCommand};

    use crate::persistence::{
        CategoryCommandRepository, CommandRepository, CommandScope, CommitSummary, StagedWrite,
    };

    fn store() -> Arc<InMemoryContentStore> {
        Arc::new(InMemoryContentStore::new())
    }

    fn create_category(scope: &CommandScope, title: &str, parent: Option<CategoryId>) -> CategoryId {
        let id = CategoryId::new();
        let mut category = Category::empty(id);
        let events = execute(
            &mut category,
            &CategoryCommand::CreateCategory(CreateCategory {
                category_id: id,
                title: title.to_string(),
                description: None,
                parent_id: parent,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        scope.categories().add(category, &events).unwrap();
        id
    }

    fn create_post(scope: &CommandScope, category_id: CategoryId, title: &str, at: DateTime<Utc>) -> PostId {
        let id = PostId::new();
        let mut post = Post::empty(id);
        let events = execute(
            &mut post,
            &PostCommand::CreatePost(CreatePost {
                post_id: id,
                category_id,
                title: title.to_string(),
                summary: Some(format!("About {title}")),
                body: "Body".to_string(),
                author: "Sara".to_string(),
                occurred_at: at,
            }),
        )
        .unwrap();
        scope.posts().add(post, &events).unwrap();
        id
    }

    #[tokio::test]
    async fn commit_writes_state_and_outbox_rows_together() {
        let store = store();
        let scope = CommandScope::new(store.clone());
        let id = create_category(&scope, "Rust", None);

        let summary = scope.unit_of_work().commit().await.unwrap();

        assert_eq!(summary.writes, 1);
        assert_eq!(summary.messages, 1);
        assert!(store.load_category(id).await.unwrap().is_some());
        let outbox = store.outbox_messages();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].message_type, "content.category.created");
        assert_eq!(outbox[0].aggregate_id, id.0);
        assert!(outbox[0].is_pending());
    }

    #[tokio::test]
    async fn conflicting_change_set_persists_nothing() {
        let store = store();
        let setup = CommandScope::new(store.clone());
        let id = create_category(&setup, "Rust", None);
        setup.unit_of_work().commit().await.unwrap();

        // Two scopes load the same version; the second commit must fail.
        let first = CommandScope::new(store.clone());
        let second = CommandScope::new(store.clone());
        for (scope, title) in [(&first, "First"), (&second, "Second")] {
            let mut category = scope.categories().get(id).await.unwrap().unwrap();
            let events = execute(
                &mut category,
                &CategoryCommand::UpdateCategory(UpdateCategory {
                    category_id: id,
                    title: title.to_string(),
                    description: None,
                    parent_id: None,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
            scope.categories().update(category, &events).unwrap();
        }
        // A second, unrelated write in the losing change set.
        let sibling = create_category(&second, "Sibling", None);

        first.unit_of_work().commit().await.unwrap();
        let err = second.unit_of_work().commit().await.unwrap_err();

        assert!(matches!(err, PersistenceError::Conflict(_)));
        assert_eq!(store.load_category(id).await.unwrap().unwrap().title(), "First");
        assert!(store.load_category(sibling).await.unwrap().is_none());
        let types: Vec<_> = store.outbox_messages().into_iter().map(|m| m.message_type).collect();
        assert_eq!(types, vec!["content.category.created", "content.category.updated"]);
    }

    #[tokio::test]
    async fn repository_rejects_category_that_is_its_own_parent() {
        let store = store();
        let scope = CommandScope::new(store.clone());
        let id = CategoryId::new();
        let looped = Category::rehydrate(
            id,
            "Loop".to_string(),
            None,
            Some(id),
            Audit::created(Utc::now()),
            1,
        );

        let err = scope.categories().add(looped.clone(), &[]).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::Rejected(ref e) if *e == DomainError::invariant("category.self_parent")
        ));

        // The store enforces the same rule for change sets built by hand.
        let err = store
            .commit(ChangeSet {
                writes: vec![StagedWrite {
                    write: AggregateWrite::Category(looped),
                    expected: ExpectedVersion::NoAggregate,
                }],
                ..ChangeSet::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Rejected(_)));
        assert!(store.load_category(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn post_referencing_missing_category_is_rejected() {
        let store = store();
        let scope = CommandScope::new(store.clone());
        create_post(&scope, CategoryId::new(), "Orphan", Utc::now());

        let err = scope.unit_of_work().commit().await.unwrap_err();

        assert!(matches!(
            err,
            PersistenceError::Rejected(ref e) if *e == DomainError::not_found("category.not_found")
        ));
        assert!(store.outbox_messages().is_empty());
    }

    #[tokio::test]
    async fn parent_and_child_in_one_change_set_commit() {
        let store = store();
        let scope = CommandScope::new(store.clone());
        let parent = create_category(&scope, "Parent", None);
        let child = create_category(&scope, "Child", Some(parent));
        create_post(&scope, child, "Post", Utc::now());

        scope.unit_of_work().commit().await.unwrap();

        assert!(scope.categories().is_parent_category(parent).await.unwrap());
        assert!(!scope.categories().is_parent_category(child).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_inbox_record_fails_the_commit() {
        let store = store();
        let message_id = Uuid::now_v7();

        let first = CommandScope::new(store.clone());
        first.mark_consumed(message_id, "consumer");
        first.unit_of_work().commit().await.unwrap();
        assert!(first.has_consumed(message_id, "consumer").await.unwrap());
        assert!(!first.has_consumed(message_id, "other").await.unwrap());

        let second = CommandScope::new(store.clone());
        second.mark_consumed(message_id, "consumer");
        let err = second.unit_of_work().commit().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict(_)));
    }

    #[tokio::test]
    async fn empty_unit_of_work_is_a_no_op() {
        let scope = CommandScope::new(store());
        assert_eq!(scope.unit_of_work().commit().await.unwrap(), CommitSummary::default());
    }

    #[tokio::test]
    async fn post_query_returns_empty_list_when_nothing_matches() {
        let store = store();

        let all = PostQueryRepository::execute(store.as_ref(), &GetAllPostQuery::default())
            .await
            .unwrap();
        assert!(all.is_empty());

        let scope = CommandScope::new(store.clone());
        let category = create_category(&scope, "Rust", None);
        create_post(&scope, category, "Ownership", Utc::now());
        scope.unit_of_work().commit().await.unwrap();

        let none = PostQueryRepository::execute(
            store.as_ref(),
            &GetAllPostQuery {
                search: Some("haskell".to_string()),
                ..GetAllPostQuery::default()
            },
        )
        .await
        .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn posts_are_listed_newest_first_with_search_and_paging() {
        let store = store();
        let scope = CommandScope::new(store.clone());
        let category = create_category(&scope, "Rust", None);
        let now = Utc::now();
        let old = create_post(&scope, category, "Borrowing basics", now - Duration::hours(2));
        let mid = create_post(&scope, category, "Async traits", now - Duration::hours(1));
        let new = create_post(&scope, category, "Borrowing in closures", now);
        scope.unit_of_work().commit().await.unwrap();

        let all = PostQueryRepository::execute(store.as_ref(), &GetAllPostQuery::default())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![new, mid, old]);
        assert_eq!(all[0].category_title.as_deref(), Some("Rust"));

        let search = PostQueryRepository::execute(
            store.as_ref(),
            &GetAllPostQuery {
                search: Some("  BORROWING ".to_string()),
                ..GetAllPostQuery::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(search.iter().map(|p| p.id).collect::<Vec<_>>(), vec![new, old]);

        let second_page = PostQueryRepository::execute(
            store.as_ref(),
            &GetAllPostQuery {
                page: 2,
                page_size: 2,
                ..GetAllPostQuery::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(second_page.iter().map(|p| p.id).collect::<Vec<_>>(), vec![old]);
    }

    #[tokio::test]
    async fn outbox_pending_rows_drain_in_commit_order() {
        let store = store();
        let scope = CommandScope::new(store.clone());
        create_category(&scope, "A", None);
        create_category(&scope, "B", None);
        scope.unit_of_work().commit().await.unwrap();

        let pending = store.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|m| m.aggregate_type == "content.category"));

        store.record_failure(pending[0].id, "boom").await.unwrap();
        store.mark_published(&[pending[1].id], Utc::now()).await.unwrap();

        let remaining = store.fetch_pending(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, pending[0].id);
        assert_eq!(remaining[0].attempts, 1);
        assert_eq!(remaining[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn purge_drops_only_published_rows_and_old_inbox_records() {
        let store = store();
        let scope = CommandScope::new(store.clone());
        create_category(&scope, "A", None);
        create_category(&scope, "B", None);
        scope.mark_consumed(Uuid::now_v7(), "consumer");
        scope.unit_of_work().commit().await.unwrap();

        let pending = store.fetch_pending(10).await.unwrap();
        let published_at = Utc::now();
        store.mark_published(&[pending[0].id], published_at).await.unwrap();

        let earlier = published_at - Duration::minutes(1);
        assert_eq!(store.purge(earlier).await.unwrap(), PurgeReport::default());

        let report = store.purge(Utc::now()).await.unwrap();
        assert_eq!(report, PurgeReport { outbox: 1, inbox: 1 });

        let remaining = store.outbox_messages();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, pending[1].id);
        assert!(remaining[0].is_pending());
    }
}
