//! Tracing, logging, metrics (shared setup).

/// Tracing configuration (filters, layers, OTLP export).
pub mod tracing;

/// Prometheus recorder and metric descriptions.
pub mod metrics;

pub use self::metrics::{MetricsError, detached_handle, install_prometheus};
pub use self::tracing::{LogFormat, TelemetryError, TelemetryGuard, TelemetryOptions, init};
