use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use content_core::{
    Aggregate, AggregateId, AggregateRoot, Audit, Audited, DomainError, impl_uuid_newtype,
    required_text,
};
use content_events::Event;
use content_events::integration::CommentAddedEvent;
use content_posts::PostId;

/// Comment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub AggregateId);

impl_uuid_newtype!(CommentId, "CommentId");

pub const AUTHOR_NAME_MAX_CHARS: usize = 100;
pub const TEXT_MAX_CHARS: usize = 2000;

/// Aggregate root: Comment (belongs to one post).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    id: CommentId,
    post_id: PostId,
    author_name: String,
    text: String,
    audit: Audit,
    version: u64,
    created: bool,
}

impl Comment {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: CommentId) -> Self {
        Self {
            id,
            post_id: PostId::from_uuid(Uuid::nil()),
            author_name: String::new(),
            text: String::new(),
            audit: Audit::created(DateTime::<Utc>::UNIX_EPOCH),
            version: 0,
            created: false,
        }
    }

    pub fn rehydrate(
        id: CommentId,
        post_id: PostId,
        author_name: String,
        text: String,
        audit: Audit,
        version: u64,
    ) -> Self {
        Self {
            id,
            post_id,
            author_name,
            text,
            audit,
            version,
            created: true,
        }
    }

    pub fn id_typed(&self) -> CommentId {
        self.id
    }

    pub fn post_id(&self) -> PostId {
        self.post_id
    }

    pub fn author_name(&self) -> &str {
        &self.author_name
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl AggregateRoot for Comment {
    type Id = CommentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Audited for Comment {
    fn audit(&self) -> &Audit {
        &self.audit
    }
}

/// Command: AddComment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddComment {
    pub comment_id: CommentId,
    pub post_id: PostId,
    pub author_name: String,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteComment (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteComment {
    pub comment_id: CommentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentCommand {
    AddComment(AddComment),
    DeleteComment(DeleteComment),
}

/// Event: CommentDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentDeleted {
    pub comment_id: CommentId,
    pub post_id: PostId,
    pub occurred_at: DateTime<Utc>,
}

/// `CommentAdded` carries the published integration contract as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentEvent {
    CommentAdded(CommentAddedEvent),
    CommentDeleted(CommentDeleted),
}

impl Event for CommentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CommentEvent::CommentAdded(_) => {
                <CommentAddedEvent as content_events::IntegrationEvent>::MESSAGE_TYPE
            }
            CommentEvent::CommentDeleted(_) => "content.comment.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CommentEvent::CommentAdded(e) => e.occurred_at,
            CommentEvent::CommentDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Comment {
    type Command = CommentCommand;
    type Event = CommentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CommentEvent::CommentAdded(e) => {
                self.id = CommentId::from_uuid(e.comment_id);
                self.post_id = PostId::from_uuid(e.post_id);
                self.author_name = e.author_name.clone();
                self.text = e.text.clone();
                self.audit = Audit::created(e.occurred_at);
                self.created = true;
            }
            CommentEvent::CommentDeleted(e) => {
                self.audit.mark_deleted(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CommentCommand::AddComment(cmd) => self.handle_add(cmd),
            CommentCommand::DeleteComment(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Comment {
    fn handle_add(&self, cmd: &AddComment) -> Result<Vec<CommentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("comment.already_exists"));
        }

        let author_name = required_text(&cmd.author_name, AUTHOR_NAME_MAX_CHARS, "author_name")?;
        let text = required_text(&cmd.text, TEXT_MAX_CHARS, "text")?;

        Ok(vec![CommentEvent::CommentAdded(CommentAddedEvent {
            comment_id: cmd.comment_id.as_uuid(),
            post_id: cmd.post_id.as_uuid(),
            author_name,
            text,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteComment) -> Result<Vec<CommentEvent>, DomainError> {
        if !self.created || self.audit.is_deleted {
            return Err(DomainError::not_found("comment.not_found"));
        }
        if self.id != cmd.comment_id {
            return Err(DomainError::invariant("comment.id_mismatch"));
        }

        Ok(vec![CommentEvent::CommentDeleted(CommentDeleted {
            comment_id: cmd.comment_id,
            post_id: self.post_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
