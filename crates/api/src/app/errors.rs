use std::any::Any;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use content_application::AppError;
use content_core::DomainError;

use crate::context::RequestCulture;
use crate::localization::Localizer;

/// Map an application failure onto a localized JSON error response.
///
/// Persistence detail is only exposed when `detailed` (development).
pub fn app_error_to_response(
    err: AppError,
    localizer: &Localizer,
    culture: &RequestCulture,
    detailed: bool,
) -> axum::response::Response {
    match err {
        AppError::Validation(failures) => {
            let errors: Vec<_> = failures
                .iter()
                .map(|f| {
                    json!({
                        "field": f.field,
                        "key": f.key,
                        "message": localizer.message(culture, &f.key),
                    })
                })
                .collect();
            (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({
                    "error": "validation_error",
                    "message": localizer.message(culture, "error.validation"),
                    "errors": errors,
                })),
            )
                .into_response()
        }
        AppError::Domain(domain) => domain_error_to_response(domain, localizer, culture),
        AppError::Persistence(err) => {
            tracing::error!(error = %err, "persistence failure");
            let mut body = json!({
                "error": "internal_error",
                "message": localizer.message(culture, "error.internal"),
            });
            if detailed {
                body["detail"] = json!(err.to_string());
            }
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
        }
    }
}

fn domain_error_to_response(
    err: DomainError,
    localizer: &Localizer,
    culture: &RequestCulture,
) -> axum::response::Response {
    let (status, code) = match &err {
        DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        DomainError::InvalidId(_) => (StatusCode::BAD_REQUEST, "invalid_id"),
        DomainError::InvariantViolation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation"),
        DomainError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        DomainError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
    };
    let message = match &err {
        DomainError::InvalidId(_) => localizer.message(culture, "error.invalid_id"),
        other => localizer.message(culture, other.key()),
    };

    (
        status,
        axum::Json(json!({
            "error": code,
            "key": err.key(),
            "message": message,
        })),
    )
        .into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Uniform 500 for a handler panic; the panic text is only included when `detailed`.
pub fn panic_response(
    panic: Box<dyn Any + Send + 'static>,
    localizer: &Localizer,
    detailed: bool,
) -> axum::response::Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(%detail, "request handler panicked");

    let culture = RequestCulture::new(localizer.default_culture());
    let mut body = json!({
        "error": "internal_error",
        "message": localizer.message(&culture, "error.internal"),
    });
    if detailed {
        body["detail"] = json!(detail);
    }
    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_application::ValidationFailure;
    use content_infra::PersistenceError;

    async fn body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_failures_are_localized_per_field() {
        let localizer = Localizer::default();
        let err = AppError::Validation(vec![ValidationFailure::new("title", "title.required")]);

        let response = app_error_to_response(err, &localizer, &RequestCulture::new("en-US"), false);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body(response).await;
        assert_eq!(body["errors"][0]["field"], "title");
        assert_eq!(body["errors"][0]["message"], "Title is required.");
    }

    #[tokio::test]
    async fn domain_errors_map_to_statuses() {
        let localizer = Localizer::default();
        let culture = RequestCulture::new("en-US");
        let cases = [
            (DomainError::invariant("category.self_parent"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::not_found("post.not_found"), StatusCode::NOT_FOUND),
            (DomainError::conflict("concurrency.conflict"), StatusCode::CONFLICT),
            (DomainError::validation("title.too_long"), StatusCode::BAD_REQUEST),
        ];

        for (err, status) in cases {
            let response = app_error_to_response(AppError::Domain(err), &localizer, &culture, false);
            assert_eq!(response.status(), status);
        }
    }

    #[tokio::test]
    async fn persistence_detail_is_hidden_outside_development() {
        let localizer = Localizer::default();
        let culture = RequestCulture::new("en-US");
        let failure = || AppError::Persistence(PersistenceError::Unavailable("pool exhausted".into()));

        let hidden = body(app_error_to_response(failure(), &localizer, &culture, false)).await;
        let shown = body(app_error_to_response(failure(), &localizer, &culture, true)).await;

        assert!(hidden.get("detail").is_none());
        assert_eq!(hidden["message"], "An unexpected error occurred.");
        assert!(shown["detail"].as_str().unwrap().contains("pool exhausted"));
    }
}
