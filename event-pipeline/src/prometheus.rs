// prometheus exporter setup

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

pub const PIPELINE_EVENTS_REJECTED_TOTAL: &str = "pipeline_events_rejected_total";

pub fn report_received_event() {
    counter!("pipeline_events_received_total").increment(1);
}

pub fn report_rejected_event(cause: &'static str) {
    counter!(PIPELINE_EVENTS_REJECTED_TOTAL, "cause" => cause).increment(1);
}

pub fn report_event_persisted() {
    counter!("pipeline_events_persisted_total").increment(1);
}

pub fn report_persistence_failure(cause: &'static str) {
    counter!("pipeline_persistence_failures_total", "cause" => cause).increment(1);
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
}
