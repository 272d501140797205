//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::IntoResponse,
};

use crate::metrics::{self, ChatMetrics};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    // Gauges derived from the hub are refreshed on scrape.
    ChatMetrics::set_active_rooms(state.hub.room_count());
    render_metrics()
}

/// Text exposition of the process-wide registry
pub(crate) fn render_metrics() -> (StatusCode, [(HeaderName, &'static str); 1], String) {
    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
