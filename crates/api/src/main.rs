use anyhow::Context;
use tracing::info;

use content_infra::Settings;
use content_observability::{LogFormat, TelemetryOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load configuration")?;

    let _telemetry = content_observability::init(&TelemetryOptions {
        service_name: settings.telemetry.service_name.clone(),
        log_format: LogFormat::parse(&settings.telemetry.log_format),
        otel_enabled: settings.telemetry.otel_enabled,
        otel_endpoint: settings.telemetry.otel_endpoint.clone(),
        sampling_ratio: settings.telemetry.otel_sampling_ratio,
    })?;
    let metrics = content_observability::install_prometheus()?;

    info!(environment = ?settings.environment, "Starting the app...");

    let (services, workers) = content_api::app::services::start(&settings, metrics).await?;
    let app = content_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(settings.server_addr())
        .await
        .with_context(|| format!("failed to bind {}", settings.server_addr()))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("stopping background workers");
    workers.shutdown().await;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
