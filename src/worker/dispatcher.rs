use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::NotifierConfig;
use crate::metrics::{QueueMetrics, TaskMetrics, TaskOutcome};
use crate::queue::{QueueError, Task, TaskQueue};

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::handlers::HandlerRegistry;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of workers competing for tasks
    pub concurrency: usize,
    /// Queue key to pop from
    pub event_type: String,
    /// Longest single wait on the queue; bounds how late a worker sees shutdown
    pub poll_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl From<&NotifierConfig> for DispatcherConfig {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            event_type: config.event_type.clone(),
            poll_timeout: config.poll_timeout(),
            backoff: BackoffConfig::from(config),
        }
    }
}

/// Running totals across all workers
#[derive(Debug, Default)]
pub struct DispatcherStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    unknown: AtomicU64,
    panicked: AtomicU64,
    queue_errors: AtomicU64,
    decode_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherStatsSnapshot {
    /// Tasks taken off the queue and routed, whatever the outcome
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub unknown: u64,
    pub panicked: u64,
    pub queue_errors: u64,
    pub decode_errors: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            queue_errors: self.queue_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: TaskOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            TaskOutcome::Success => &self.succeeded,
            TaskOutcome::Failed => &self.failed,
            TaskOutcome::Unknown => &self.unknown,
            TaskOutcome::Panicked => &self.panicked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Fixed-size worker pool consuming one queue key and routing tasks by type.
///
/// Delivery is at-most-once per pop: a handler error or panic is logged and the
/// task is dropped, and a task popped by a worker that dies mid-handler is lost.
#[derive(Clone)]
pub struct TaskDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Arc<dyn TaskQueue>,
    registry: HandlerRegistry,
    config: DispatcherConfig,
    stats: DispatcherStats,
}

/// Join handle for a started pool
pub struct DispatcherHandle {
    workers: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait until every worker has observed shutdown and returned.
    pub async fn join(self) {
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task terminated abnormally");
            }
        }
    }
}

impl TaskDispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, registry: HandlerRegistry, config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                registry,
                config,
                stats: DispatcherStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.queue.backend_name()
    }

    /// Readiness of the queue the workers pop from
    pub async fn check_queue(&self) -> Result<(), QueueError> {
        self.inner.queue.ping().await
    }

    /// Spawn the workers. Each one stops at its next check after `shutdown` fires.
    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> DispatcherHandle {
        let concurrency = self.inner.config.concurrency.max(1);

        tracing::info!(
            concurrency,
            event_type = %self.inner.config.event_type,
            backend = self.inner.queue.backend_name(),
            handlers = ?self.inner.registry.kinds(),
            "Starting task dispatcher"
        );

        let workers = (0..concurrency)
            .map(|worker_id| {
                let inner = Arc::clone(&self.inner);
                let shutdown = shutdown.subscribe();
                let span = tracing::info_span!("worker", worker_id);
                tokio::spawn(inner.worker_loop(worker_id, shutdown).instrument(span))
            })
            .collect();

        DispatcherHandle { workers }
    }

    /// Start the pool and wait for it to drain after shutdown.
    pub async fn run(&self, shutdown: &broadcast::Sender<()>) {
        self.start(shutdown).join().await;
        tracing::info!(stats = ?self.stats(), "Task dispatcher stopped");
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
}

impl Inner {
    async fn worker_loop(self: Arc<Self>, worker_id: usize, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = ExponentialBackoff::new(self.config.backoff.clone());
        tracing::debug!("Worker started");

        loop {
            if shutdown_requested(&mut shutdown) {
                break;
            }

            // Not raced against shutdown: dropping an in-flight BRPOP can lose a task
            // the server has already popped.
            let dequeued = self
                .queue
                .dequeue(&self.config.event_type, self.config.poll_timeout)
                .await;

            match dequeued {
                Ok(Some(task)) => {
                    backoff.reset();
                    self.dispatch(worker_id, task).await;
                }
                Ok(None) => backoff.reset(),
                Err(e) if !e.is_transient() => {
                    self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    QueueMetrics::record_decode_error();
                    tracing::warn!(error = %e, "Dropping undecodable task");
                }
                Err(e) => {
                    self.stats.queue_errors.fetch_add(1, Ordering::Relaxed);
                    QueueMetrics::record_error();

                    if shutdown_requested(&mut shutdown) {
                        break;
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Queue error, retrying dequeue after backoff"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        tracing::debug!("Worker stopped");
    }

    /// Run the handler for `task` to completion. Never fails the worker.
    async fn dispatch(&self, worker_id: usize, task: Task) {
        tracing::info!(worker_id, task_type = %task.kind, "Worker processing task");

        let Some(handler) = self.registry.get(&task.kind) else {
            tracing::warn!(task_type = %task.kind, "No handler registered for task type, discarding");
            self.finish(&task, TaskOutcome::Unknown);
            return;
        };

        let started = Instant::now();
        let result = AssertUnwindSafe(handler.handle(&task)).catch_unwind().await;
        TaskMetrics::observe_handler(&task.kind, started.elapsed());

        let outcome = match result {
            Ok(Ok(())) => TaskOutcome::Success,
            Ok(Err(e)) => {
                tracing::warn!(task_type = %task.kind, error = %e, "Task handler failed");
                TaskOutcome::Failed
            }
            Err(panic) => {
                tracing::error!(
                    task_type = %task.kind,
                    panic = %panic_message(&*panic),
                    "Task handler panicked"
                );
                TaskOutcome::Panicked
            }
        };

        self.finish(&task, outcome);
    }

    fn finish(&self, task: &Task, outcome: TaskOutcome) {
        self.stats.record(outcome);
        TaskMetrics::record_processed(&task.kind, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryTaskQueue, QueueError, NOTIFICATION_EVENT};
    use crate::worker::{HandlerError, TaskHandler};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn config(concurrency: usize) -> DispatcherConfig {
        DispatcherConfig {
            concurrency,
            event_type: NOTIFICATION_EVENT.to_string(),
            poll_timeout: Duration::from_millis(20),
            backoff: BackoffConfig {
                initial_delay_ms: 5,
                max_delay_ms: 20,
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
        }
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for Arc<Counting> {
        async fn handle(&self, _task: &Task) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Exploding;

    #[async_trait]
    impl TaskHandler for Exploding {
        async fn handle(&self, _task: &Task) -> Result<(), HandlerError> {
            panic!("handler blew up");
        }
    }

    struct Rejecting;

    #[async_trait]
    impl TaskHandler for Rejecting {
        async fn handle(&self, _task: &Task) -> Result<(), HandlerError> {
            Err(HandlerError::Failed("smtp refused".to_string()))
        }
    }

    async fn wait_for_processed(dispatcher: &TaskDispatcher, expected: u64) {
        for _ in 0..400 {
            if dispatcher.stats().processed >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("dispatcher processed {:?}, expected {}", dispatcher.stats(), expected);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_worker() {
        let queue = Arc::new(MemoryTaskQueue::new());
        let counting = Arc::new(Counting::default());

        let mut registry = HandlerRegistry::new();
        registry.register("BOOM", Exploding);
        registry.register("REJECT", Rejecting);
        registry.register("OK", counting.clone());

        for kind in ["BOOM", "REJECT", "MYSTERY", "OK"] {
            queue.enqueue(NOTIFICATION_EVENT, &Task::new(kind)).await.unwrap();
        }

        // One worker: the OK task is only reached if the worker survives the rest.
        let dispatcher = TaskDispatcher::new(queue.clone(), registry, config(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = dispatcher.start(&shutdown_tx);

        wait_for_processed(&dispatcher, 4).await;
        shutdown_tx.send(()).unwrap();
        handle.join().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undecodable_task_is_dropped_without_backoff() {
        let queue = Arc::new(MemoryTaskQueue::new());
        queue.push_raw(NOTIFICATION_EVENT, "{not json");
        queue
            .enqueue(NOTIFICATION_EVENT, &Task::new_submission("stud1"))
            .await
            .unwrap();

        let registry = HandlerRegistry::with_defaults(Duration::ZERO);
        let dispatcher = TaskDispatcher::new(queue.clone(), registry, config(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = dispatcher.start(&shutdown_tx);

        wait_for_processed(&dispatcher, 1).await;
        shutdown_tx.send(()).unwrap();
        handle.join().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.queue_errors, 0);
        assert_eq!(stats.succeeded, 1);
    }

    /// Fails the first `failures` dequeues, then behaves like the wrapped queue.
    struct Flaky {
        inner: MemoryTaskQueue,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl TaskQueue for Flaky {
        async fn enqueue(&self, event_type: &str, task: &Task) -> Result<(), QueueError> {
            self.inner.enqueue(event_type, task).await
        }

        async fn dequeue(&self, event_type: &str, timeout: Duration) -> Result<Option<Task>, QueueError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(QueueError::Unavailable("connection refused".to_string()));
            }
            self.inner.dequeue(event_type, timeout).await
        }

        async fn ping(&self) -> Result<(), QueueError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                return Err(QueueError::Unavailable("connection refused".to_string()));
            }
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let queue = Arc::new(Flaky {
            inner: MemoryTaskQueue::new(),
            failures: AtomicUsize::new(3),
        });
        queue
            .enqueue(NOTIFICATION_EVENT, &Task::new_submission("stud1"))
            .await
            .unwrap();

        let registry = HandlerRegistry::with_defaults(Duration::ZERO);
        let dispatcher = TaskDispatcher::new(queue.clone(), registry, config(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = dispatcher.start(&shutdown_tx);

        wait_for_processed(&dispatcher, 1).await;
        shutdown_tx.send(()).unwrap();
        handle.join().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.queue_errors, 3);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let queue = Arc::new(Flaky {
            inner: MemoryTaskQueue::new(),
            failures: AtomicUsize::new(usize::MAX),
        });

        let mut cfg = config(2);
        cfg.backoff.initial_delay_ms = 60_000;
        cfg.backoff.max_delay_ms = 60_000;

        let dispatcher = TaskDispatcher::new(queue, HandlerRegistry::new(), cfg);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = dispatcher.start(&shutdown_tx);
        assert_eq!(handle.len(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("workers should stop without waiting out the backoff");
    }

    #[test]
    fn test_config_from_notifier_settings() {
        let notifier = NotifierConfig::default();
        let cfg = DispatcherConfig::from(&notifier);
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.event_type, NOTIFICATION_EVENT);
        assert_eq!(cfg.poll_timeout, Duration::from_millis(1000));
    }
}
