//! Comment commands and queries.

use async_trait::async_trait;
use chrono::Utc;

use content_comments::comment::{AUTHOR_NAME_MAX_CHARS, TEXT_MAX_CHARS};
use content_comments::{AddComment, Comment, CommentCommand, CommentId, DeleteComment};
use content_core::DomainError;
use content_events::execute;
use content_infra::persistence::CommandRepository;
use content_infra::read_model::{CommentQueryResult, GetPostCommentsQuery};
use content_posts::PostId;

use crate::error::AppResult;
use crate::mediator::{Mediator, Request, RequestHandler};
use crate::validation::{Validate, ValidationFailure, Validator};

/// Adds a comment; the post's comment count follows asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddCommentCommand {
    pub post_id: PostId,
    pub author_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCommentCommand {
    pub id: CommentId,
}

impl Validate for AddCommentCommand {
    fn validate(&self) -> Vec<ValidationFailure> {
        Validator::new()
            .required("author_name", &self.author_name, AUTHOR_NAME_MAX_CHARS)
            .required("text", &self.text, TEXT_MAX_CHARS)
            .finish()
    }
}

impl Validate for DeleteCommentCommand {}
impl Validate for GetPostCommentsQuery {}

impl Request for AddCommentCommand {
    type Response = CommentId;
    const NAME: &'static str = "AddCommentCommand";
}

impl Request for DeleteCommentCommand {
    type Response = ();
    const NAME: &'static str = "DeleteCommentCommand";
}

impl Request for GetPostCommentsQuery {
    type Response = Vec<CommentQueryResult>;
    const NAME: &'static str = "GetPostCommentsQuery";
}

#[async_trait]
impl RequestHandler<AddCommentCommand> for Mediator {
    async fn handle(&self, request: AddCommentCommand) -> AppResult<CommentId> {
        let scope = self.scope();
        if !scope.posts().exists(request.post_id).await? {
            return Err(DomainError::not_found("post.not_found").into());
        }

        let id = CommentId::new();
        let mut comment = Comment::empty(id);
        let events = execute(
            &mut comment,
            &CommentCommand::AddComment(AddComment {
                comment_id: id,
                post_id: request.post_id,
                author_name: request.author_name,
                text: request.text,
                occurred_at: Utc::now(),
            }),
        )?;

        scope.comments().add(comment, &events)?;
        scope.unit_of_work().commit().await?;
        Ok(id)
    }
}

#[async_trait]
impl RequestHandler<DeleteCommentCommand> for Mediator {
    async fn handle(&self, request: DeleteCommentCommand) -> AppResult<()> {
        let scope = self.scope();
        let comments = scope.comments();

        let mut comment = comments
            .get(request.id)
            .await?
            .ok_or_else(|| DomainError::not_found("comment.not_found"))?;
        let events = execute(
            &mut comment,
            &CommentCommand::DeleteComment(DeleteComment {
                comment_id: request.id,
                occurred_at: Utc::now(),
            }),
        )?;

        comments.update(comment, &events)?;
        scope.unit_of_work().commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RequestHandler<GetPostCommentsQuery> for Mediator {
    async fn handle(&self, request: GetPostCommentsQuery) -> AppResult<Vec<CommentQueryResult>> {
        Ok(self.queries().comments.execute(&request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::CreateCategoryCommand;
    use crate::error::AppError;
    use crate::posts::CreatePostCommand;
    use crate::testing::mediator;

    async fn post(mediator: &Mediator) -> PostId {
        let category_id = mediator
            .send(CreateCategoryCommand {
                title: "Rust".to_string(),
                description: None,
                parent_id: None,
            })
            .await
            .unwrap();
        mediator
            .send(CreatePostCommand {
                category_id,
                title: "Lifetimes".to_string(),
                summary: None,
                body: "Body".to_string(),
                author: "Sara".to_string(),
            })
            .await
            .unwrap()
    }

    fn add(post_id: PostId, text: &str) -> AddCommentCommand {
        AddCommentCommand {
            post_id,
            author_name: "Reza".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn added_comment_stages_the_integration_event() {
        let (mediator, store) = mediator();
        let post_id = post(&mediator).await;

        let id = mediator.send(add(post_id, "Great read")).await.unwrap();

        let added: Vec<_> = store
            .outbox_messages()
            .into_iter()
            .filter(|m| m.message_type == "content.comment.added")
            .collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].payload["comment_id"], id.as_uuid().to_string());
        assert_eq!(added[0].payload["post_id"], post_id.as_uuid().to_string());
    }

    #[tokio::test]
    async fn comment_on_missing_post_is_not_found() {
        let (mediator, _) = mediator();

        let err = mediator.send(add(PostId::new(), "Hello")).await.unwrap_err();

        assert!(matches!(err, AppError::Domain(DomainError::NotFound(ref k)) if k == "post.not_found"));
    }

    #[tokio::test]
    async fn comments_are_listed_oldest_first_without_deleted_ones() {
        let (mediator, _) = mediator();
        let post_id = post(&mediator).await;
        let first = mediator.send(add(post_id, "first")).await.unwrap();
        let second = mediator.send(add(post_id, "second")).await.unwrap();
        let third = mediator.send(add(post_id, "third")).await.unwrap();

        mediator.send(DeleteCommentCommand { id: second }).await.unwrap();

        let listed: Vec<_> = mediator
            .send(GetPostCommentsQuery { post_id })
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![first, third]);
    }

    #[tokio::test]
    async fn comments_of_unknown_post_are_an_empty_list() {
        let (mediator, _) = mediator();

        let listed = mediator
            .send(GetPostCommentsQuery { post_id: PostId::new() })
            .await
            .unwrap();

        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn blank_text_fails_validation() {
        let (mediator, _) = mediator();

        let err = mediator.send(add(PostId::new(), "")).await.unwrap_err();

        assert_eq!(err.kind(), "validation");
    }
}
