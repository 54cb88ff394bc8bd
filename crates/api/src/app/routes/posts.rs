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

use content_application::comments::AddCommentCommand;
use content_application::posts::{
    CreatePostCommand, DeletePostCommand, GetPostByIdQuery, UpdatePostCommand,
};
use content_categories::CategoryId;
use content_infra::read_model::{GetAllPostQuery, GetPostCommentsQuery};
use content_posts::PostId;

use crate::app::dto;
use crate::app::services::AppServices;
use crate::context::RequestCulture;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_post).get(list_posts))
        .route("/:id", get(get_post).put(update_post).delete(delete_post))
        .route("/:id/comments", get(list_comments).post(add_comment))
}

pub async fn create_post(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    body: Result<Json<dto::CreatePostRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category_id: CategoryId = match dto::parse_id(&body.category_id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let command = CreatePostCommand {
        category_id,
        title: body.title,
        summary: body.summary,
        body: body.body,
        author: body.author,
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

pub async fn list_posts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    params: Result<Query<dto::ListPostsParams>, QueryRejection>,
) -> axum::response::Response {
    let params = match dto::query_params(params, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category_id =
        match dto::parse_optional_id(params.category_id.as_deref(), &services.localizer, &culture) {
            Ok(v) => v,
            Err(resp) => return resp,
        };

    let query = GetAllPostQuery {
        category_id,
        search: params.search,
        page: params.page,
        page_size: params.page_size,
    };
    match services.mediator.send(query).await {
        Ok(posts) => Json(posts).into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}

pub async fn get_post(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: PostId = match dto::parse_id(&id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.mediator.send(GetPostByIdQuery { id }).await {
        Ok(post) => Json(post).into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}

pub async fn update_post(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdatePostRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id: PostId = match dto::parse_id(&id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category_id: CategoryId = match dto::parse_id(&body.category_id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let command = UpdatePostCommand {
        id,
        category_id,
        title: body.title,
        summary: body.summary,
        body: body.body,
    };
    match services.mediator.send(command).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}

pub async fn delete_post(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: PostId = match dto::parse_id(&id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.mediator.send(DeletePostCommand { id }).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}

pub async fn list_comments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let post_id: PostId = match dto::parse_id(&id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Unknown posts are a 404 here; the query itself only lists.
    if let Err(e) = services.mediator.send(GetPostByIdQuery { id: post_id }).await {
        return services.error_response(e, &culture);
    }

    match services.mediator.send(GetPostCommentsQuery { post_id }).await {
        Ok(comments) => Json(comments).into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}

pub async fn add_comment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    Path(id): Path<String>,
    body: Result<Json<dto::AddCommentRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let post_id: PostId = match dto::parse_id(&id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let command = AddCommentCommand {
        post_id,
        author_name: body.author_name,
        text: body.text,
    };
    match services.mediator.send(command).await {
        // The post's comment count is updated asynchronously.
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": id.to_string() })),
        )
            .into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}
