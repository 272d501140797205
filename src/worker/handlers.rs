use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::queue::{Task, TaskKind};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Missing payload field: {0}")]
    MissingField(&'static str),

    #[error("Handler failed: {0}")]
    Failed(String),
}

/// Processes one kind of task. Runs to completion once started.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError>;
}

fn required<'a>(task: &'a Task, field: &'static str) -> Result<&'a str, HandlerError> {
    task.field(field)
        .filter(|v| !v.is_empty())
        .ok_or(HandlerError::MissingField(field))
}

/// Sends the account confirmation email.
///
/// Delivery is simulated with a fixed latency.
pub struct EmailConfirmationHandler {
    delay: Duration,
}

impl EmailConfirmationHandler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl TaskHandler for EmailConfirmationHandler {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let email = required(task, "email")?;
        tracing::info!(email = %email, "Sending confirmation email");
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Tells staff that a student handed in new work.
pub struct NewSubmissionHandler;

#[async_trait]
impl TaskHandler for NewSubmissionHandler {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let student_id = required(task, "student_id")?;
        tracing::info!(
            student_id = %student_id,
            "Notifying staff about new submission"
        );
        Ok(())
    }
}

/// Dispatch table from task type to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in notification handlers
    pub fn with_defaults(email_delay: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(
            TaskKind::EMAIL_CONFIRMATION,
            EmailConfirmationHandler::new(email_delay),
        );
        registry.register(TaskKind::NEW_SUBMISSION, NewSubmissionHandler);
        registry
    }

    /// Route `kind` to `handler`, returning the handler it replaces.
    pub fn register<H>(&mut self, kind: impl Into<String>, handler: H) -> Option<Arc<dyn TaskHandler>>
    where
        H: TaskHandler + 'static,
    {
        self.handlers.insert(kind.into(), Arc::new(handler))
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
