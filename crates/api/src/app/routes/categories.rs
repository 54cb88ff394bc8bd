use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use content_application::categories::{
    CreateCategoryCommand, DeleteCategoryCommand, GetCategoryByIdQuery, UpdateCategoryCommand,
};
use content_categories::CategoryId;
use content_infra::read_model::GetAllCategoryQuery;

use crate::app::dto;
use crate::app::services::AppServices;
use crate::context::RequestCulture;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_category).get(list_categories))
        .route(
            "/:id",
            get(get_category).put(update_category).delete(delete_category),
        )
}

pub async fn create_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    body: Result<Json<dto::CategoryRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let parent_id =
        match dto::parse_optional_id(body.parent_id.as_deref(), &services.localizer, &culture) {
            Ok(v) => v,
            Err(resp) => return resp,
        };

    let command = CreateCategoryCommand {
        title: body.title,
        description: body.description,
        parent_id,
    };
    match services.mediator.send(command).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": id.to_string() })),
        )
            .into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}

pub async fn list_categories(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    params: Result<Query<dto::ListCategoriesParams>, QueryRejection>,
) -> axum::response::Response {
    let params = match dto::query_params(params, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let parent_id =
        match dto::parse_optional_id(params.parent_id.as_deref(), &services.localizer, &culture) {
            Ok(v) => v,
            Err(resp) => return resp,
        };

    match services.mediator.send(GetAllCategoryQuery { parent_id }).await {
        Ok(categories) => Json(categories).into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}

pub async fn get_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: CategoryId = match dto::parse_id(&id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.mediator.send(GetCategoryByIdQuery { id }).await {
        Ok(category) => Json(category).into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}

pub async fn update_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    Path(id): Path<String>,
    body: Result<Json<dto::CategoryRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id: CategoryId = match dto::parse_id(&id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let parent_id =
        match dto::parse_optional_id(body.parent_id.as_deref(), &services.localizer, &culture) {
            Ok(v) => v,
            Err(resp) => return resp,
        };

    let command = UpdateCategoryCommand {
        id,
        title: body.title,
        description: body.description,
        parent_id,
    };
    match services.mediator.send(command).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}

pub async fn delete_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: CategoryId = match dto::parse_id(&id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.mediator.send(DeleteCategoryCommand { id }).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}
