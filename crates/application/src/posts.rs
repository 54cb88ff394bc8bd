//! Post commands and queries.

use async_trait::async_trait;
use chrono::Utc;

use content_categories::CategoryId;
use content_core::{DomainError, Title};
use content_events::execute;
use content_infra::persistence::CommandRepository;
use content_infra::read_model::{
    GetAllPostQuery, MAX_PAGE_SIZE, PostDetailsQueryResult, PostQueryResult,
};
use content_posts::post::{AUTHOR_MAX_CHARS, BODY_MAX_CHARS, SUMMARY_MAX_CHARS};
use content_posts::{CreatePost, DeletePost, Post, PostCommand, PostId, UpdatePost};

use crate::error::AppResult;
use crate::mediator::{Mediator, Request, RequestHandler};
use crate::validation::{Validate, ValidationFailure, Validator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePostCommand {
    pub category_id: CategoryId,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePostCommand {
    pub id: PostId,
    pub category_id: CategoryId,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePostCommand {
    pub id: PostId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPostByIdQuery {
    pub id: PostId,
}

impl Validate for CreatePostCommand {
    fn validate(&self) -> Vec<ValidationFailure> {
        Validator::new()
            .required("title", &self.title, Title::MAX_CHARS)
            .optional("summary", self.summary.as_deref(), SUMMARY_MAX_CHARS)
            .required("body", &self.body, BODY_MAX_CHARS)
            .required("author", &self.author, AUTHOR_MAX_CHARS)
            .finish()
    }
}

impl Validate for UpdatePostCommand {
    fn validate(&self) -> Vec<ValidationFailure> {
        Validator::new()
            .required("title", &self.title, Title::MAX_CHARS)
            .optional("summary", self.summary.as_deref(), SUMMARY_MAX_CHARS)
            .required("body", &self.body, BODY_MAX_CHARS)
            .finish()
    }
}

impl Validate for GetAllPostQuery {
    fn validate(&self) -> Vec<ValidationFailure> {
        Validator::new()
            .check("page", self.page >= 1)
            .check("page_size", (1..=MAX_PAGE_SIZE).contains(&self.page_size))
            .finish()
    }
}

impl Validate for DeletePostCommand {}
impl Validate for GetPostByIdQuery {}

impl Request for CreatePostCommand {
    type Response = PostId;
    const NAME: &'static str = "CreatePostCommand";
}

impl Request for UpdatePostCommand {
    type Response = ();
    const NAME: &'static str = "UpdatePostCommand";
}

impl Request for DeletePostCommand {
    type Response = ();
    const NAME: &'static str = "DeletePostCommand";
}

impl Request for GetAllPostQuery {
    type Response = Vec<PostQueryResult>;
    const NAME: &'static str = "GetAllPostQuery";
}

impl Request for GetPostByIdQuery {
    type Response = PostDetailsQueryResult;
    const NAME: &'static str = "GetPostByIdQuery";
}

#[async_trait]
impl RequestHandler<CreatePostCommand> for Mediator {
    async fn handle(&self, request: CreatePostCommand) -> AppResult<PostId> {
        let scope = self.scope();
        if !scope.categories().exists(request.category_id).await? {
            return Err(DomainError::not_found("category.not_found").into());
        }

        let id = PostId::new();
        let mut post = Post::empty(id);
        let events = execute(
            &mut post,
            &PostCommand::CreatePost(CreatePost {
                post_id: id,
                category_id: request.category_id,
                title: request.title,
                summary: request.summary,
                body: request.body,
                author: request.author,
                occurred_at: Utc::now(),
            }),
        )?;

        scope.posts().add(post, &events)?;
        scope.unit_of_work().commit().await?;
        Ok(id)
    }
}

#[async_trait]
impl RequestHandler<UpdatePostCommand> for Mediator {
    async fn handle(&self, request: UpdatePostCommand) -> AppResult<()> {
        let scope = self.scope();
        let posts = scope.posts();

        let mut post = posts
            .get(request.id)
            .await?
            .ok_or_else(|| DomainError::not_found("post.not_found"))?;
        if post.category_id() != request.category_id
            && !scope.categories().exists(request.category_id).await?
        {
            return Err(DomainError::not_found("category.not_found").into());
        }

        let events = execute(
            &mut post,
            &PostCommand::UpdatePost(UpdatePost {
                post_id: request.id,
                category_id: request.category_id,
                title: request.title,
                summary: request.summary,
                body: request.body,
                occurred_at: Utc::now(),
            }),
        )?;

        posts.update(post, &events)?;
        scope.unit_of_work().commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RequestHandler<DeletePostCommand> for Mediator {
    async fn handle(&self, request: DeletePostCommand) -> AppResult<()> {
        let scope = self.scope();
        let posts = scope.posts();

        let mut post = posts
            .get(request.id)
            .await?
            .ok_or_else(|| DomainError::not_found("post.not_found"))?;
        let events = execute(
            &mut post,
            &PostCommand::DeletePost(DeletePost {
                post_id: request.id,
                occurred_at: Utc::now(),
            }),
        )?;

        posts.update(post, &events)?;
        scope.unit_of_work().commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RequestHandler<GetAllPostQuery> for Mediator {
    /// No matches is an empty list, not an error.
    async fn handle(&self, request: GetAllPostQuery) -> AppResult<Vec<PostQueryResult>> {
        Ok(self.queries().posts.execute(&request).await?)
    }
}

#[async_trait]
impl RequestHandler<GetPostByIdQuery> for Mediator {
    async fn handle(&self, request: GetPostByIdQuery) -> AppResult<PostDetailsQueryResult> {
        self.queries()
            .posts
            .find_by_id(request.id)
            .await?
            .ok_or_else(|| DomainError::not_found("post.not_found").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::CreateCategoryCommand;
    use crate::error::AppError;
    use crate::testing::mediator;

    async fn category(mediator: &Mediator) -> CategoryId {
        mediator
            .send(CreateCategoryCommand {
                title: "Rust".to_string(),
                description: None,
                parent_id: None,
            })
            .await
            .unwrap()
    }

    fn create(category_id: CategoryId, title: &str) -> CreatePostCommand {
        CreatePostCommand {
            category_id,
            title: title.to_string(),
            summary: Some("A short tour".to_string()),
            body: "Borrowing rules, explained.".to_string(),
            author: "Sara".to_string(),
        }
    }

    #[tokio::test]
    async fn no_posts_is_an_empty_list() {
        let (mediator, _) = mediator();

        let posts = mediator.send(GetAllPostQuery::default()).await.unwrap();

        assert!(posts.is_empty());
    }

    #[tokio::test]
    async fn post_needs_an_existing_category() {
        let (mediator, store) = mediator();

        let err = mediator.send(create(CategoryId::new(), "Lifetimes")).await.unwrap_err();

        assert!(matches!(err, AppError::Domain(DomainError::NotFound(ref k)) if k == "category.not_found"));
        assert!(store.outbox_messages().is_empty());
    }

    #[tokio::test]
    async fn created_post_is_returned_with_its_body() {
        let (mediator, _) = mediator();
        let category_id = category(&mediator).await;

        let id = mediator.send(create(category_id, "Lifetimes")).await.unwrap();
        let post = mediator.send(GetPostByIdQuery { id }).await.unwrap();

        assert_eq!(post.post.title, "Lifetimes");
        assert_eq!(post.post.category_title.as_deref(), Some("Rust"));
        assert_eq!(post.body, "Borrowing rules, explained.");
        assert_eq!(post.post.comment_count, 0);
    }

    #[tokio::test]
    async fn every_missing_field_is_reported() {
        let (mediator, _) = mediator();

        let err = mediator
            .send(CreatePostCommand {
                category_id: CategoryId::new(),
                title: String::new(),
                summary: None,
                body: " ".to_string(),
                author: String::new(),
            })
            .await
            .unwrap_err();

        let AppError::Validation(failures) = err else {
            panic!("expected validation failure");
        };
        let fields: Vec<_> = failures.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["title", "body", "author"]);
    }

    #[tokio::test]
    async fn page_size_out_of_range_is_rejected() {
        let (mediator, _) = mediator();

        let err = mediator
            .send(GetAllPostQuery {
                page_size: MAX_PAGE_SIZE + 1,
                ..GetAllPostQuery::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn deleted_post_disappears_from_queries() {
        let (mediator, _) = mediator();
        let category_id = category(&mediator).await;
        let id = mediator.send(create(category_id, "Lifetimes")).await.unwrap();

        mediator.send(DeletePostCommand { id }).await.unwrap();

        assert!(mediator.send(GetAllPostQuery::default()).await.unwrap().is_empty());
        let err = mediator.send(GetPostByIdQuery { id }).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        let err = mediator.send(DeletePostCommand { id }).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn update_replaces_editable_fields() {
        let (mediator, _) = mediator();
        let category_id = category(&mediator).await;
        let id = mediator.send(create(category_id, "Lifetimes")).await.unwrap();

        mediator
            .send(UpdatePostCommand {
                id,
                category_id,
                title: "Lifetimes, revisited".to_string(),
                summary: None,
                body: "Shorter.".to_string(),
            })
            .await
            .unwrap();

        let post = mediator.send(GetPostByIdQuery { id }).await.unwrap();
        assert_eq!(post.post.title, "Lifetimes, revisited");
        assert_eq!(post.post.summary, None);
        assert!(post.post.updated_at.is_some());
    }
}
