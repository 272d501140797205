//! Durable task queue used to hand background work to the notifier.
//!
//! Tasks travel as JSON `{"type": "...", "payload": {...}}` on a list keyed by
//! event type. Producers push on the left, workers pop from the right, so each
//! list is FIFO and every task is popped by exactly one consumer.

mod factory;
mod memory_backend;
mod redis_backend;

pub use factory::create_task_queue;
pub use memory_backend::MemoryTaskQueue;
pub use redis_backend::RedisTaskQueue;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Queue key shared by every notification producer and the notifier
pub const NOTIFICATION_EVENT: &str = "events:notifications";

/// Well-known task types. The set is open; any string can be registered.
pub struct TaskKind;

impl TaskKind {
    pub const EMAIL_CONFIRMATION: &'static str = "EMAIL_CONFIRMATION";
    pub const NEW_SUBMISSION: &'static str = "NEW_SUBMISSION";
}

/// A typed unit of background work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: HashMap<String, String>,
}

impl Task {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn email_confirmation(email: impl Into<String>) -> Self {
        Self::new(TaskKind::EMAIL_CONFIRMATION).with_field("email", email)
    }

    pub fn new_submission(student_id: impl Into<String>) -> Self {
        Self::new(TaskKind::NEW_SUBMISSION).with_field("student_id", student_id)
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(QueueError::Encode)
    }

    pub fn from_json(raw: &str) -> Result<Self, QueueError> {
        serde_json::from_str(raw).map_err(QueueError::Decode)
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to encode task: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode task: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Whether retrying the same call later may succeed.
    ///
    /// A decode error means the item was already popped and is gone.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Redis(_) | QueueError::Unavailable(_))
    }
}

/// List-style blocking queue keyed by event type.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a task to the queue for `event_type`.
    async fn enqueue(&self, event_type: &str, task: &Task) -> Result<(), QueueError>;

    /// Pop the oldest task, waiting at most `timeout` for one to arrive.
    ///
    /// Returns `Ok(None)` when the wait elapses with the queue still empty.
    async fn dequeue(&self, event_type: &str, timeout: Duration) -> Result<Option<Task>, QueueError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), QueueError>;

    /// Backend name for logs and health output
    fn backend_name(&self) -> &'static str;
}
