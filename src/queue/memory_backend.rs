//! In-memory task queue backend using DashMap.
//!
//! Keeps the same list semantics as the Redis backend (push left, pop right,
//! payloads stored as JSON text) so it can stand in for Redis in tests and
//! single-process deployments. Contents are lost on restart.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::metrics::TaskMetrics;

use super::{QueueError, Task, TaskQueue};

/// One event type's list plus a wake-up for blocked consumers.
#[derive(Default)]
struct EventList {
    items: Mutex<VecDeque<String>>,
    ready: Notify,
}

impl EventList {
    fn push(&self, raw: String) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_front(raw);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_back()
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory task queue backend.
#[derive(Default)]
pub struct MemoryTaskQueue {
    lists: DashMap<String, Arc<EventList>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, event_type: &str) -> Arc<EventList> {
        self.lists
            .entry(event_type.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Push a raw payload as-is, bypassing task encoding.
    pub fn push_raw(&self, event_type: &str, raw: impl Into<String>) {
        self.list(event_type).push(raw.into());
    }

    /// Number of tasks waiting under `event_type`
    pub fn len(&self, event_type: &str) -> usize {
        self.lists.get(event_type).map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, event_type: &str) -> bool {
        self.len(event_type) == 0
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, event_type: &str, task: &Task) -> Result<(), QueueError> {
        let raw = task.to_json()?;
        self.list(event_type).push(raw);
        TaskMetrics::record_enqueued(event_type);

        tracing::debug!(event_type = %event_type, task_type = %task.kind, "Task enqueued");
        Ok(())
    }

    async fn dequeue(&self, event_type: &str, timeout: Duration) -> Result<Option<Task>, QueueError> {
        let list = self.list(event_type);
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push in between still wakes us.
            let ready = list.ready.notified();

            if let Some(raw) = list.pop() {
                // A stored permit may belong to another waiter now that this one is served.
                if !list.is_empty() {
                    list.ready.notify_one();
                }
                return Task::from_json(&raw).map(Some);
            }

            if timeout_at(deadline, ready).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
