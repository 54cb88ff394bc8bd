//! Prometheus exporter for the `metrics` facade.
//!
//! The recorder is installed once per process; the returned handle renders
//! the text exposition served at `/metrics`.

use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build Prometheus recorder: {0}")]
    Build(#[from] BuildError),
}

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    Ok(PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("_seconds".to_string()), LATENCY_BUCKETS)?)
}

/// Install the global recorder and describe the service's metrics.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = builder()?.install_recorder()?;
    describe();
    Ok(handle)
}

/// A recorder that is not installed globally; its handle renders nothing
/// recorded through the facade. Used where a process-wide recorder already
/// exists or is not wanted (tests).
pub fn detached_handle() -> Result<PrometheusHandle, MetricsError> {
    Ok(builder()?.build_recorder().handle())
}

fn describe() {
    describe_counter!("content_http_requests_total", "HTTP requests by method, route and status.");
    describe_histogram!(
        "content_http_request_seconds",
        Unit::Seconds,
        "HTTP request latency."
    );
    describe_counter!("content_mediator_requests_total", "Mediator requests by name and outcome.");
    describe_histogram!(
        "content_mediator_request_seconds",
        Unit::Seconds,
        "Mediator request latency, validation included."
    );
    describe_counter!("content_unit_of_work_commits_total", "Unit of work commits by outcome.");
    describe_histogram!(
        "content_unit_of_work_commit_seconds",
        Unit::Seconds,
        "Unit of work commit latency."
    );
    describe_counter!(
        "content_outbox_messages_staged_total",
        "Outbox messages written alongside business data."
    );
    describe_counter!("content_outbox_published_total", "Outbox messages published to the bus.");
    describe_counter!(
        "content_outbox_publish_failures_total",
        "Failed outbox publish attempts."
    );
    describe_counter!("content_consumer_consumed_total", "Messages consumed successfully.");
    describe_counter!("content_consumer_skipped_total", "Messages with no registered consumer.");
    describe_counter!("content_consumer_retries_total", "Immediate consumer retries.");
    describe_counter!("content_consumer_redeliveries_total", "Delayed redeliveries scheduled.");
    describe_counter!("content_consumer_dead_letters_total", "Messages moved to the error queue.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_handle_renders_without_a_global_recorder() {
        let handle = detached_handle().unwrap();

        assert!(handle.render().is_empty());
    }
}
