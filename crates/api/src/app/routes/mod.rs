use axum::Router;

pub mod categories;
pub mod comments;
pub mod posts;
pub mod system;

/// Router for the content endpoints under `/api`.
pub fn router() -> Router {
    Router::new()
        .nest("/categories", categories::router())
        .nest("/posts", posts::router())
        .nest("/comments", comments::router())
}
