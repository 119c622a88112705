use std::future::ready;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::endpoint;
use crate::metrics_middleware::track_metrics;
use crate::pipeline::Pipeline;
use crate::prometheus::setup_metrics_recorder;

#[derive(Clone)]
pub struct State {
    pub pipeline: Pipeline,
}

async fn index() -> &'static str {
    "event-pipeline"
}

pub fn router(pipeline: Pipeline, metrics: bool) -> Router {
    // Leave headroom above the payload cap so that the validator, not the
    // body limit, decides on payloads close to it
    let body_limit = pipeline
        .validator()
        .limits()
        .max_payload_bytes
        .saturating_mul(2);
    let state = State { pipeline };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index))
        .route("/events/:kind", post(endpoint::event))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when used as a library (during tests etc)
    // does not work well.
    if !metrics {
        return router;
    }
    match setup_metrics_recorder() {
        Ok(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        Err(err) => {
            error!("failed to install prometheus recorder: {err}");
            router
        }
    }
}
