//! Health and metrics endpoints of the notification worker process.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::worker::{DispatcherStatsSnapshot, TaskDispatcher};

use super::metrics::render_metrics;

#[derive(Clone)]
pub struct NotifierState {
    pub dispatcher: TaskDispatcher,
    pub start_time: Instant,
}

impl NotifierState {
    pub fn new(dispatcher: TaskDispatcher) -> Self {
        Self {
            dispatcher,
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotifierHealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub backend: &'static str,
    pub queue: String,
    pub tasks: DispatcherStatsSnapshot,
}

/// GET /health - 503 while the queue is unreachable
pub async fn notifier_health(State(state): State<NotifierState>) -> impl IntoResponse {
    let (status, queue) = match state.dispatcher.check_queue().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "Queue health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable".to_string())
        }
    };

    let body = NotifierHealthResponse {
        status: if status.is_success() { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        backend: state.dispatcher.backend_name(),
        queue,
        tasks: state.dispatcher.stats(),
    };

    (status, Json(body))
}

/// GET /metrics - task and queue series recorded by the workers
pub async fn notifier_metrics() -> impl IntoResponse {
    render_metrics()
}

pub fn notifier_routes(state: NotifierState) -> Router {
    Router::new()
        .route("/health", get(notifier_health))
        .route("/metrics", get(notifier_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
