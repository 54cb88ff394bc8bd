use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consumer::IntegrationEvent;

/// Published when a comment is added to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentAddedEvent {
    pub comment_id: Uuid,
    pub post_id: Uuid,
    pub author_name: String,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
}

impl IntegrationEvent for CommentAddedEvent {
    const MESSAGE_TYPE: &'static str = "content.comment.added";
}
