//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (stores, bus, receive endpoint, workers)
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request DTOs and id parsing
//! - `errors.rs`: localized error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let localizer = services.localizer.clone();
    let panic_localizer = services.localizer.clone();
    let detailed = services.detailed_errors();

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics))
        .nest("/api", routes::router())
        .layer(axum::middleware::from_fn(middleware::http_metrics_middleware))
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    localizer,
                    middleware::localization_middleware,
                ))
                .layer(CatchPanicLayer::custom(move |panic| {
                    errors::panic_response(panic, &panic_localizer, detailed)
                })),
        )
}

pub use services::AppServices;
