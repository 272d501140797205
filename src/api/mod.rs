//! API layer - HTTP endpoint handlers.

mod chat;
mod health;
mod metrics;
mod notifier;
mod routes;

pub use chat::{chat_history, mark_read, HistoryParams, MarkReadResponse, RoomParams};
pub use health::{health, HealthResponse};
pub use metrics::prometheus_metrics;
pub use notifier::{
    notifier_health, notifier_metrics, notifier_routes, NotifierHealthResponse, NotifierState,
};
pub use routes::api_routes;
