use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use content_categories::CategoryId;
use content_core::{
    Aggregate, AggregateId, AggregateRoot, Audit, Audited, DomainError, Title, impl_uuid_newtype,
    optional_text, required_text,
};
use content_events::Event;

/// Post identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub AggregateId);

impl_uuid_newtype!(PostId, "PostId");

pub const SUMMARY_MAX_CHARS: usize = 500;
pub const BODY_MAX_CHARS: usize = 100_000;
pub const AUTHOR_MAX_CHARS: usize = 100;

/// Aggregate root: Post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    id: PostId,
    category_id: CategoryId,
    title: String,
    summary: Option<String>,
    body: String,
    author: String,
    comment_count: u32,
    audit: Audit,
    version: u64,
    created: bool,
}

/// Stored columns of a post, used to rebuild the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostState {
    pub id: PostId,
    pub category_id: CategoryId,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub author: String,
    pub comment_count: u32,
    pub audit: Audit,
    pub version: u64,
}

impl Post {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: PostId) -> Self {
        Self {
            id,
            category_id: CategoryId::from_uuid(Uuid::nil()),
            title: String::new(),
            summary: None,
            body: String::new(),
            author: String::new(),
            comment_count: 0,
            audit: Audit::created(DateTime::<Utc>::UNIX_EPOCH),
            version: 0,
            created: false,
        }
    }

    pub fn rehydrate(state: PostState) -> Self {
        Self {
            id: state.id,
            category_id: state.category_id,
            title: state.title,
            summary: state.summary,
            body: state.body,
            author: state.author,
            comment_count: state.comment_count,
            audit: state.audit,
            version: state.version,
            created: true,
        }
    }

    pub fn id_typed(&self) -> PostId {
        self.id
    }

    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn comment_count(&self) -> u32 {
        self.comment_count
    }
}

impl AggregateRoot for Post {
    type Id = PostId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Audited for Post {
    fn audit(&self) -> &Audit {
        &self.audit
    }
}

/// Command: CreatePost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePost {
    pub post_id: PostId,
    pub category_id: CategoryId,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub author: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePost. The author is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePost {
    pub post_id: PostId,
    pub category_id: CategoryId,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeletePost (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePost {
    pub post_id: PostId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostCommand {
    CreatePost(CreatePost),
    UpdatePost(UpdatePost),
    DeletePost(DeletePost),
}

/// Event: PostCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCreated {
    pub post_id: PostId,
    pub category_id: CategoryId,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub author: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PostUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostUpdated {
    pub post_id: PostId,
    pub category_id: CategoryId,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PostDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDeleted {
    pub post_id: PostId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostEvent {
    PostCreated(PostCreated),
    PostUpdated(PostUpdated),
    PostDeleted(PostDeleted),
}

impl Event for PostEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PostEvent::PostCreated(_) => "content.post.created",
            PostEvent::PostUpdated(_) => "content.post.updated",
            PostEvent::PostDeleted(_) => "content.post.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PostEvent::PostCreated(e) => e.occurred_at,
            PostEvent::PostUpdated(e) => e.occurred_at,
            PostEvent::PostDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Post {
    type Command = PostCommand;
    type Event = PostEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PostEvent::PostCreated(e) => {
                self.id = e.post_id;
                self.category_id = e.category_id;
                self.title = e.title.clone();
                self.summary = e.summary.clone();
                self.body = e.body.clone();
                self.author = e.author.clone();
                self.comment_count = 0;
                self.audit = Audit::created(e.occurred_at);
                self.created = true;
            }
            PostEvent::PostUpdated(e) => {
                self.category_id = e.category_id;
                self.title = e.title.clone();
                self.summary = e.summary.clone();
                self.body = e.body.clone();
                self.audit.touch(e.occurred_at);
            }
            PostEvent::PostDeleted(e) => {
                self.audit.mark_deleted(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PostCommand::CreatePost(cmd) => self.handle_create(cmd),
            PostCommand::UpdatePost(cmd) => self.handle_update(cmd),
            PostCommand::DeletePost(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Post {
    fn ensure_live(&self, post_id: PostId) -> Result<(), DomainError> {
        if !self.created || self.audit.is_deleted {
            return Err(DomainError::not_found("post.not_found"));
        }
        if self.id != post_id {
            return Err(DomainError::invariant("post.id_mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePost) -> Result<Vec<PostEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("post.already_exists"));
        }

        let title = Title::parse(&cmd.title)?;
        let summary = optional_text(cmd.summary.as_deref(), SUMMARY_MAX_CHARS, "summary")?;
        let body = required_text(&cmd.body, BODY_MAX_CHARS, "body")?;
        let author = required_text(&cmd.author, AUTHOR_MAX_CHARS, "author")?;

        Ok(vec![PostEvent::PostCreated(PostCreated {
            post_id: cmd.post_id,
            category_id: cmd.category_id,
            title: title.into(),
            summary,
            body,
            author,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdatePost) -> Result<Vec<PostEvent>, DomainError> {
        self.ensure_live(cmd.post_id)?;

        let title = Title::parse(&cmd.title)?;
        let summary = optional_text(cmd.summary.as_deref(), SUMMARY_MAX_CHARS, "summary")?;
        let body = required_text(&cmd.body, BODY_MAX_CHARS, "body")?;

        Ok(vec![PostEvent::PostUpdated(PostUpdated {
            post_id: cmd.post_id,
            category_id: cmd.category_id,
            title: title.into(),
            summary,
            body,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeletePost) -> Result<Vec<PostEvent>, DomainError> {
        self.ensure_live(cmd.post_id)?;

        Ok(vec![PostEvent::PostDeleted(PostDeleted {
            post_id: cmd.post_id,
            occurred_at: cmd.occurred_at,
        })])
    }

}

impl Post {
    /// Count one more comment on this post.
    ///
    /// Raises no event: the count is derived from `content.comment.added`.
    /// The version still moves so concurrent writers conflict.
    pub fn register_comment(&mut self, occurred_at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.created || self.audit.is_deleted {
            return Err(DomainError::not_found("post.not_found"));
        }

        self.comment_count = self.comment_count.saturating_add(1);
        self.audit.touch(occurred_at);
        self.version += 1;
        Ok(())
    }
}
