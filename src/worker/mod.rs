//! Notification worker: a pool that pops tasks from the durable queue and
//! routes them through a dispatch table of handlers.

mod backoff;
mod dispatcher;
mod handlers;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use dispatcher::{
    DispatcherConfig, DispatcherHandle, DispatcherStats, DispatcherStatsSnapshot, TaskDispatcher,
};
pub use handlers::{
    EmailConfirmationHandler, HandlerError, HandlerRegistry, NewSubmissionHandler, TaskHandler,
};
