//! Prometheus metrics for the chat hub and the notification worker.
//!
//! - Chat metrics (live connections, active rooms, fan-out outcomes)
//! - Task metrics (enqueued, processed by outcome, handler latency)
//! - Queue metrics (connectivity and decode errors)

mod helpers;

pub use helpers::{encode_metrics, ChatMetrics, QueueMetrics, TaskMetrics, TaskOutcome};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "lms";

lazy_static! {
    // ============================================================================
    // Chat Metrics
    // ============================================================================

    /// Live chat WebSocket sessions
    pub static ref CHAT_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_chat_connections_active", METRIC_PREFIX),
        "Number of live chat WebSocket sessions"
    ).unwrap();

    /// Rooms with at least one subscriber
    pub static ref CHAT_ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_chat_rooms_active", METRIC_PREFIX),
        "Number of chat rooms with at least one subscriber"
    ).unwrap();

    /// Messages persisted and broadcast
    pub static ref CHAT_MESSAGES_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_chat_messages_sent_total", METRIC_PREFIX),
        "Total chat messages persisted and broadcast"
    ).unwrap();

    /// Per-subscriber fan-out outcomes
    pub static ref CHAT_DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_chat_deliveries_total", METRIC_PREFIX),
        "Per-subscriber broadcast outcomes",
        &["outcome"]
    ).unwrap();

    /// Messages rejected by the message store
    pub static ref CHAT_PERSIST_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_chat_persist_failures_total", METRIC_PREFIX),
        "Total chat messages that failed to persist and were not broadcast"
    ).unwrap();

    /// Chat session lifetime
    pub static ref CHAT_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_chat_connection_duration_seconds", METRIC_PREFIX),
        "Chat WebSocket session duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Task Metrics
    // ============================================================================

    /// Tasks pushed onto the durable queue
    pub static ref TASKS_ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_tasks_enqueued_total", METRIC_PREFIX),
        "Total tasks enqueued",
        &["event"]
    ).unwrap();

    /// Tasks taken by a worker, by outcome
    pub static ref TASKS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_tasks_processed_total", METRIC_PREFIX),
        "Total tasks processed by workers",
        &["task_type", "outcome"]
    ).unwrap();

    /// Handler execution time
    pub static ref TASK_HANDLER_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_task_handler_duration_seconds", METRIC_PREFIX),
        "Task handler execution time in seconds",
        &["task_type"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Transient queue failures (connection refused, dropped connection)
    pub static ref QUEUE_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_errors_total", METRIC_PREFIX),
        "Total transient queue errors"
    ).unwrap();

    /// Payloads that could not be decoded into a task
    pub static ref QUEUE_DECODE_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_decode_errors_total", METRIC_PREFIX),
        "Total queue payloads discarded as undecodable"
    ).unwrap();
}
