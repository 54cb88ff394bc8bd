//! Category commands and queries.

use async_trait::async_trait;
use chrono::Utc;

use content_categories::category::DESCRIPTION_MAX_CHARS;
use content_categories::{
    Category, CategoryCommand, CategoryId, CreateCategory, DeleteCategory, UpdateCategory,
};
use content_core::{DomainError, Title};
use content_events::execute;
use content_infra::persistence::{CategoryCommandRepository, CommandRepository};
use content_infra::read_model::{CategoryQueryResult, GetAllCategoryQuery};

use crate::error::AppResult;
use crate::mediator::{Mediator, Request, RequestHandler};
use crate::validation::{Validate, ValidationFailure, Validator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCategoryCommand {
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCategoryCommand {
    pub id: CategoryId,
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCategoryCommand {
    pub id: CategoryId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCategoryByIdQuery {
    pub id: CategoryId,
}

fn validate_fields(title: &str, description: Option<&str>) -> Vec<ValidationFailure> {
    Validator::new()
        .required("title", title, Title::MAX_CHARS)
        .optional("description", description, DESCRIPTION_MAX_CHARS)
        .finish()
}

impl Validate for CreateCategoryCommand {
    fn validate(&self) -> Vec<ValidationFailure> {
        validate_fields(&self.title, self.description.as_deref())
    }
}

impl Validate for UpdateCategoryCommand {
    fn validate(&self) -> Vec<ValidationFailure> {
        validate_fields(&self.title, self.description.as_deref())
    }
}

impl Validate for DeleteCategoryCommand {}
impl Validate for GetCategoryByIdQuery {}
impl Validate for GetAllCategoryQuery {}

impl Request for CreateCategoryCommand {
    type Response = CategoryId;
    const NAME: &'static str = "CreateCategoryCommand";
}

impl Request for UpdateCategoryCommand {
    type Response = ();
    const NAME: &'static str = "UpdateCategoryCommand";
}

impl Request for DeleteCategoryCommand {
    type Response = ();
    const NAME: &'static str = "DeleteCategoryCommand";
}

impl Request for GetAllCategoryQuery {
    type Response = Vec<CategoryQueryResult>;
    const NAME: &'static str = "GetAllCategoryQuery";
}

impl Request for GetCategoryByIdQuery {
    type Response = CategoryQueryResult;
    const NAME: &'static str = "GetCategoryByIdQuery";
}

/// A referenced parent must exist and be live.
async fn ensure_parent_exists<R>(
    categories: &R,
    id: Option<CategoryId>,
    parent_id: Option<CategoryId>,
) -> AppResult<()>
where
    R: CommandRepository<Category>,
{
    match parent_id {
        // A self reference is rejected by the aggregate itself.
        Some(parent) if Some(parent) != id => {
            if !categories.exists(parent).await? {
                return Err(DomainError::not_found("category.parent_not_found").into());
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl RequestHandler<CreateCategoryCommand> for Mediator {
    async fn handle(&self, request: CreateCategoryCommand) -> AppResult<CategoryId> {
        let scope = self.scope();
        let categories = scope.categories();
        ensure_parent_exists(&categories, None, request.parent_id).await?;

        let id = CategoryId::new();
        let mut category = Category::empty(id);
        let events = execute(
            &mut category,
            &CategoryCommand::CreateCategory(CreateCategory {
                category_id: id,
                title: request.title,
                description: request.description,
                parent_id: request.parent_id,
                occurred_at: Utc::now(),
            }),
        )?;

        categories.add(category, &events)?;
        scope.unit_of_work().commit().await?;
        Ok(id)
    }
}

#[async_trait]
impl RequestHandler<UpdateCategoryCommand> for Mediator {
    async fn handle(&self, request: UpdateCategoryCommand) -> AppResult<()> {
        let scope = self.scope();
        let categories = scope.categories();

        let mut category = categories
            .get(request.id)
            .await?
            .ok_or_else(|| DomainError::not_found("category.not_found"))?;
        ensure_parent_exists(&categories, Some(request.id), request.parent_id).await?;

        let events = execute(
            &mut category,
            &CategoryCommand::UpdateCategory(UpdateCategory {
                category_id: request.id,
                title: request.title,
                description: request.description,
                parent_id: request.parent_id,
                occurred_at: Utc::now(),
            }),
        )?;

        categories.update(category, &events)?;
        scope.unit_of_work().commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RequestHandler<DeleteCategoryCommand> for Mediator {
    async fn handle(&self, request: DeleteCategoryCommand) -> AppResult<()> {
        let scope = self.scope();
        let categories = scope.categories();

        let mut category = categories
            .get(request.id)
            .await?
            .ok_or_else(|| DomainError::not_found("category.not_found"))?;
        if categories.is_parent_category(request.id).await? {
            return Err(DomainError::invariant("category.has_children").into());
        }

        let events = execute(
            &mut category,
            &CategoryCommand::DeleteCategory(DeleteCategory {
                category_id: request.id,
                occurred_at: Utc::now(),
            }),
        )?;

        categories.update(category, &events)?;
        scope.unit_of_work().commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RequestHandler<GetAllCategoryQuery> for Mediator {
    async fn handle(&self, request: GetAllCategoryQuery) -> AppResult<Vec<CategoryQueryResult>> {
        Ok(self.queries().categories.execute(&request).await?)
    }
}

#[async_trait]
impl RequestHandler<GetCategoryByIdQuery> for Mediator {
    async fn handle(&self, request: GetCategoryByIdQuery) -> AppResult<CategoryQueryResult> {
        self.queries()
            .categories
            .find_by_id(request.id)
            .await?
            .ok_or_else(|| DomainError::not_found("category.not_found").into())
    }
}
