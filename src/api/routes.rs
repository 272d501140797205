use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::chat::{chat_history, mark_read};
use super::health::health;
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Chat REST endpoints; the WebSocket lives in server/app.rs
        .route("/chat/history", get(chat_history))
        .route("/chat/read", post(mark_read))
}
