use std::sync::Arc;

use axum::{
    Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::delete,
};

use content_application::comments::DeleteCommentCommand;
use content_comments::CommentId;

use crate::app::dto;
use crate::app::services::AppServices;
use crate::context::RequestCulture;

pub fn router() -> Router {
    Router::new().route("/:id", delete(delete_comment))
}

pub async fn delete_comment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(culture): Extension<RequestCulture>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: CommentId = match dto::parse_id(&id, &services.localizer, &culture) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.mediator.send(DeleteCommentCommand { id }).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => services.error_response(e, &culture),
    }
}
