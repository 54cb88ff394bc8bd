//! HTTP API: server, routing, localization and request/response mapping.

pub mod app;
pub mod context;
pub mod localization;
pub mod middleware;
