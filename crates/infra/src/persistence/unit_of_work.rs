//! Per-request change tracking and atomic commit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, instrument};
use uuid::Uuid;

use content_categories::Category;
use content_comments::Comment;
use content_core::ExpectedVersion;
use content_posts::Post;

use super::repositories::StoreRepository;
use super::{ChangeSet, CommandStore, InboxRecord, PersistedAggregate, PersistenceError, StagedWrite};
use crate::outbox::OutboxMessage;

/// Staged writes, outbox messages and inbox records of one scope.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    pending: Mutex<ChangeSet>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ChangeSet> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage the new state of `aggregate` and turn `events` into outbox messages.
    ///
    /// Staging the same aggregate twice keeps the first expectation and the
    /// latest state.
    pub fn stage<T: PersistedAggregate>(
        &self,
        aggregate: T,
        events: &[T::Event],
        expected: ExpectedVersion,
    ) -> Result<(), PersistenceError> {
        let aggregate_id = aggregate.aggregate_id();
        let messages = events
            .iter()
            .map(|event| OutboxMessage::from_event(T::AGGREGATE_TYPE, aggregate_id, event))
            .collect::<Result<Vec<_>, _>>()?;

        let write = aggregate.into_write();
        let mut pending = self.lock();
        match pending.writes.iter_mut().find(|staged| {
            staged.write.aggregate_type() == write.aggregate_type()
                && staged.write.aggregate_id() == aggregate_id
        }) {
            Some(staged) => staged.write = write,
            None => pending.writes.push(StagedWrite { write, expected }),
        }
        pending.outbox.extend(messages);
        Ok(())
    }

    pub fn record_consumed(&self, message_id: Uuid, consumer: &str) {
        self.lock().inbox.push(InboxRecord {
            message_id,
            consumer: consumer.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain everything staged so far.
    pub fn take(&self) -> ChangeSet {
        std::mem::take(&mut *self.lock())
    }
}

/// Write context of one request or one consumed message.
#[derive(Clone)]
pub struct CommandScope {
    store: Arc<dyn CommandStore>,
    tracker: Arc<ChangeTracker>,
}

impl CommandScope {
    pub fn new(store: Arc<dyn CommandStore>) -> Self {
        Self {
            store,
            tracker: Arc::new(ChangeTracker::new()),
        }
    }

    pub fn categories(&self) -> StoreRepository<Category> {
        StoreRepository::new(self.store.clone(), self.tracker.clone())
    }

    pub fn posts(&self) -> StoreRepository<Post> {
        StoreRepository::new(self.store.clone(), self.tracker.clone())
    }

    pub fn comments(&self) -> StoreRepository<Comment> {
        StoreRepository::new(self.store.clone(), self.tracker.clone())
    }

    pub async fn has_consumed(&self, message_id: Uuid, consumer: &str) -> Result<bool, PersistenceError> {
        self.store.has_consumed(message_id, consumer).await
    }

    /// Record `message_id` as consumed; committed with the rest of the scope.
    pub fn mark_consumed(&self, message_id: Uuid, consumer: &str) {
        self.tracker.record_consumed(message_id, consumer);
    }

    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork {
            store: self.store.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitSummary {
    pub writes: usize,
    pub messages: usize,
}

pub struct UnitOfWork {
    store: Arc<dyn CommandStore>,
    tracker: Arc<ChangeTracker>,
}

impl UnitOfWork {
    /// Commit everything staged in the scope as one transaction.
    ///
    /// Staged changes are drained whether or not the commit succeeds.
    #[instrument(skip(self), err)]
    pub async fn commit(&self) -> Result<CommitSummary, PersistenceError> {
        let changes = self.tracker.take();
        if changes.is_empty() {
            return Ok(CommitSummary::default());
        }

        let summary = CommitSummary {
            writes: changes.writes.len(),
            messages: changes.outbox.len(),
        };
        let started = Instant::now();

        match self.store.commit(changes).await {
            Ok(()) => {
                metrics::counter!("content_unit_of_work_commits_total", "outcome" => "committed")
                    .increment(1);
                metrics::counter!("content_outbox_messages_staged_total")
                    .increment(summary.messages as u64);
                metrics::histogram!("content_unit_of_work_commit_seconds")
                    .record(started.elapsed().as_secs_f64());
                debug!(writes = summary.writes, messages = summary.messages, "unit of work committed");
                Ok(summary)
            }
            Err(err) => {
                let outcome = match err {
                    PersistenceError::Conflict(_) => "conflict",
                    PersistenceError::Rejected(_) => "rejected",
                    _ => "failed",
                };
                metrics::counter!("content_unit_of_work_commits_total", "outcome" => outcome)
                    .increment(1);
                Err(err)
            }
        }
    }
}
