use std::str::FromStr;

use axum::Json;
use axum::extract::Query;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::debug;

use content_core::DomainError;
use content_infra::read_model::DEFAULT_PAGE_SIZE;

use crate::app::errors;
use crate::context::RequestCulture;
use crate::localization::Localizer;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub category_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub author: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub category_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub author_name: String,
    pub text: String,
}

// -------------------------
// Query strings
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListCategoriesParams {
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPostsParams {
    pub category_id: Option<String>,
    pub search: Option<String>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn first_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

// -------------------------
// Parsing helpers
// -------------------------

/// Parse a path or body identifier, answering 400 with a localized message.
pub fn parse_id<T>(
    raw: &str,
    localizer: &Localizer,
    culture: &RequestCulture,
) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.trim().parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            localizer.message(culture, "error.invalid_id"),
        )
    })
}

/// Like [`parse_id`], but blank or missing input is `None`.
pub fn parse_optional_id<T>(
    raw: Option<&str>,
    localizer: &Localizer,
    culture: &RequestCulture,
) -> Result<Option<T>, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_id(raw, localizer, culture).map(Some),
    }
}

/// Unwrap a JSON body; a rejected one keeps its status but gets the localized error shape.
pub fn json_body<T>(
    body: Result<Json<T>, JsonRejection>,
    localizer: &Localizer,
    culture: &RequestCulture,
) -> Result<T, axum::response::Response> {
    body.map(|Json(value)| value).map_err(|rejection| {
        debug!(status = %rejection.status(), detail = %rejection.body_text(), "request body rejected");
        errors::json_error(
            rejection.status(),
            "invalid_body",
            localizer.message(culture, "error.invalid_body"),
        )
    })
}

/// Unwrap query parameters, answering 400 with a localized message.
pub fn query_params<T>(
    params: Result<Query<T>, QueryRejection>,
    localizer: &Localizer,
    culture: &RequestCulture,
) -> Result<T, axum::response::Response> {
    params.map(|Query(value)| value).map_err(|rejection| {
        debug!(detail = %rejection.body_text(), "query string rejected");
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_query",
            localizer.message(culture, "error.invalid_query"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::{Request, Uri, header::CONTENT_TYPE};
    use content_categories::CategoryId;

    async fn body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn extract_json(content_type: &str, raw: &'static str) -> Result<Json<AddCommentRequest>, JsonRejection> {
        let request = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(raw))
            .unwrap();
        Json::<AddCommentRequest>::from_request(request, &()).await
    }

    #[tokio::test]
    async fn malformed_json_gets_the_localized_error_shape() {
        let localizer = Localizer::default();
        let culture = RequestCulture::new("es");

        let response = json_body(extract_json("application/json", "{").await, &localizer, &culture).unwrap_err();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body(response).await;
        assert_eq!(body["error"], "invalid_body");
        assert_eq!(body["message"], "El cuerpo de la solicitud no es válido.");
    }

    #[tokio::test]
    async fn body_rejections_keep_their_status() {
        let localizer = Localizer::default();
        let culture = RequestCulture::new("en-US");

        let missing_field = extract_json("application/json", r#"{"author_name":"Reza"}"#).await;
        let response = json_body(missing_field, &localizer, &culture).unwrap_err();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let wrong_type = extract_json("text/plain", r#"{"author_name":"Reza","text":"Hi"}"#).await;
        let response = json_body(wrong_type, &localizer, &culture).unwrap_err();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body(response).await["message"], "The request body is not valid.");
    }

    #[tokio::test]
    async fn bad_query_strings_are_localized_bad_requests() {
        let localizer = Localizer::default();
        let culture = RequestCulture::new("fa-IR");
        let uri: Uri = "/api/posts?page=first".parse().unwrap();

        let response =
            query_params(Query::<ListPostsParams>::try_from_uri(&uri), &localizer, &culture).unwrap_err();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body(response).await;
        assert_eq!(body["error"], "invalid_query");
        assert_eq!(body["message"], "پارامترهای درخواست نامعتبر است.");
    }

    #[test]
    fn valid_query_strings_pass_through() {
        let localizer = Localizer::default();
        let culture = RequestCulture::new("en-US");
        let uri: Uri = "/api/posts?search=rust%20lang&page=2".parse().unwrap();

        let params =
            query_params(Query::<ListPostsParams>::try_from_uri(&uri), &localizer, &culture).unwrap();

        assert_eq!(params.search.as_deref(), Some("rust lang"));
        assert_eq!(params.page, 2);
    }

    #[test]
    fn blank_optional_ids_are_none() {
        let localizer = Localizer::default();
        let culture = RequestCulture::new("en-US");

        let parsed: Option<CategoryId> = parse_optional_id(Some("  "), &localizer, &culture).unwrap();

        assert_eq!(parsed, None);
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let localizer = Localizer::default();
        let culture = RequestCulture::new("en-US");

        let err = parse_id::<CategoryId>("not-a-uuid", &localizer, &culture).unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn list_posts_defaults_to_the_first_page() {
        let params: ListPostsParams = serde_json::from_str("{}").unwrap();

        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, DEFAULT_PAGE_SIZE);
    }
}
