//! Tracing/logging initialization.
//!
//! Console output is JSON or pretty, filtered through `RUST_LOG` (default
//! `info`). When enabled, spans are also exported over OTLP/gRPC.

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::{Resource, runtime};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(String),

    #[error("failed to install subscriber: {0}")]
    Subscriber(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// `pretty` (any case) selects pretty output; anything else is JSON.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("pretty") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    pub service_name: String,
    pub log_format: LogFormat,
    pub otel_enabled: bool,
    pub otel_endpoint: String,
    /// Clamped to `0.0..=1.0`.
    pub sampling_ratio: f64,
}

/// Flushes and shuts down the OTLP pipeline on drop.
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            tracing::info!("shutting down OpenTelemetry tracer provider");
            if let Err(err) = provider.shutdown() {
                tracing::warn!(error = %err, "tracer provider shutdown failed");
            }
        }
    }
}

/// Install the process-wide subscriber.
///
/// Keep the returned guard alive for the lifetime of the process. Fails if a
/// global subscriber is already set.
pub fn init(options: &TelemetryOptions) -> Result<TelemetryGuard, TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = if options.otel_enabled {
        Some(tracer_provider(options)?)
    } else {
        None
    };
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(options.service_name.clone()))
    });

    let (json, pretty) = match options.log_format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .with_timer(fmt::time::SystemTime)
                    .with_target(false),
            ),
            None,
        ),
        LogFormat::Pretty => (None, Some(fmt::layer().pretty())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .with(otel_layer)
        .try_init()
        .map_err(|err| TelemetryError::Subscriber(err.to_string()))?;

    tracing::info!(
        service_name = %options.service_name,
        otel_enabled = options.otel_enabled,
        "tracing initialized"
    );
    Ok(TelemetryGuard { provider })
}

fn sampler(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

fn tracer_provider(options: &TelemetryOptions) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&options.otel_endpoint)
        .build()
        .map_err(|err| TelemetryError::ExporterBuild(err.to_string()))?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler(options.sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![
            KeyValue::new(SERVICE_NAME, options.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ]))
        .build())
}
