//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    CHAT_CONNECTIONS_ACTIVE, CHAT_CONNECTION_DURATION, CHAT_DELIVERIES_TOTAL,
    CHAT_MESSAGES_SENT_TOTAL, CHAT_PERSIST_FAILURES_TOTAL, CHAT_ROOMS_ACTIVE,
    QUEUE_DECODE_ERRORS_TOTAL, QUEUE_ERRORS_TOTAL, TASKS_ENQUEUED_TOTAL, TASKS_PROCESSED_TOTAL,
    TASK_HANDLER_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording chat metrics
pub struct ChatMetrics;

impl ChatMetrics {
    pub fn connection_opened() {
        CHAT_CONNECTIONS_ACTIVE.inc();
    }

    pub fn connection_closed(duration: Duration) {
        CHAT_CONNECTIONS_ACTIVE.dec();
        CHAT_CONNECTION_DURATION.observe(duration.as_secs_f64());
    }

    pub fn set_active_rooms(count: usize) {
        CHAT_ROOMS_ACTIVE.set(count as i64);
    }

    pub fn record_sent() {
        CHAT_MESSAGES_SENT_TOTAL.inc();
    }

    pub fn record_persist_failure() {
        CHAT_PERSIST_FAILURES_TOTAL.inc();
    }

    /// Record one broadcast's fan-out result
    pub fn record_fanout(delivered: usize, dropped: usize, closed: usize) {
        if delivered > 0 {
            CHAT_DELIVERIES_TOTAL
                .with_label_values(&["delivered"])
                .inc_by(delivered as u64);
        }
        if dropped > 0 {
            CHAT_DELIVERIES_TOTAL
                .with_label_values(&["dropped"])
                .inc_by(dropped as u64);
        }
        if closed > 0 {
            CHAT_DELIVERIES_TOTAL
                .with_label_values(&["closed"])
                .inc_by(closed as u64);
        }
    }
}

/// Final state of one dequeued task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed,
    Unknown,
    Panicked,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::Failed => "failed",
            TaskOutcome::Unknown => "unknown",
            TaskOutcome::Panicked => "panicked",
        }
    }
}

/// Helper struct for recording task metrics
pub struct TaskMetrics;

impl TaskMetrics {
    pub fn record_enqueued(event_type: &str) {
        TASKS_ENQUEUED_TOTAL.with_label_values(&[event_type]).inc();
    }

    pub fn record_processed(task_type: &str, outcome: TaskOutcome) {
        // Unknown types are unbounded input; collapse them into one label.
        let label = match outcome {
            TaskOutcome::Unknown => "unregistered",
            _ => task_type,
        };
        TASKS_PROCESSED_TOTAL
            .with_label_values(&[label, outcome.as_str()])
            .inc();
    }

    pub fn observe_handler(task_type: &str, elapsed: Duration) {
        TASK_HANDLER_DURATION
            .with_label_values(&[task_type])
            .observe(elapsed.as_secs_f64());
    }
}

/// Helper struct for recording queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn record_error() {
        QUEUE_ERRORS_TOTAL.inc();
    }

    pub fn record_decode_error() {
        QUEUE_DECODE_ERRORS_TOTAL.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_contains_prefix() {
        ChatMetrics::record_sent();
        TaskMetrics::record_enqueued("events:test");
        let output = encode_metrics().unwrap();
        assert!(output.contains("lms_chat_messages_sent_total"));
        assert!(output.contains("lms_tasks_enqueued_total"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(TaskOutcome::Success.as_str(), "success");
        assert_eq!(TaskOutcome::Panicked.as_str(), "panicked");
    }
}
