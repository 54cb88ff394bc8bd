use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, State},
    http::{HeaderValue, header::CONTENT_LANGUAGE},
    middleware::Next,
    response::Response,
};

use crate::localization::Localizer;

/// Negotiate the request culture and echo it as `Content-Language`.
pub async fn localization_middleware(
    State(localizer): State<Arc<Localizer>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let culture = localizer.negotiate(req.uri().query(), req.headers());
    let header = HeaderValue::from_str(culture.name()).ok();
    req.extensions_mut().insert(culture);

    let mut response = next.run(req).await;
    if let Some(header) = header {
        response.headers_mut().insert(CONTENT_LANGUAGE, header);
    }
    response
}

/// Count and time requests by method, matched route and status.
pub async fn http_metrics_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        "content_http_requests_total",
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!("content_http_request_seconds", "method" => method, "route" => route)
        .record(started.elapsed().as_secs_f64());

    response
}
