//! Task queue backend factory

use std::sync::Arc;

use crate::config::Settings;

use super::memory_backend::MemoryTaskQueue;
use super::redis_backend::RedisTaskQueue;
use super::{QueueError, TaskQueue};

/// Create a task queue based on `queue.backend`.
///
/// - `"memory"`: in-process queue, only visible to this process
/// - `"redis"` (default): Redis lists at `redis.url`
pub fn create_task_queue(settings: &Settings) -> Result<Arc<dyn TaskQueue>, QueueError> {
    match settings.queue.backend.as_str() {
        "memory" => {
            tracing::info!(backend = "memory", "Creating memory task queue");
            Ok(Arc::new(MemoryTaskQueue::new()))
        }
        other => {
            if other != "redis" {
                tracing::warn!(backend = %other, "Unknown task queue backend, using redis");
            }
            tracing::info!(backend = "redis", url = %settings.redis.url, "Creating Redis task queue");
            Ok(Arc::new(RedisTaskQueue::new(&settings.redis)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChatConfig, JwtConfig, NotifierConfig, OtelConfig, QueueConfig, RedisConfig, ServerConfig,
    };

    fn settings(backend: &str) -> Settings {
        Settings {
            server: ServerConfig::default(),
            jwt: JwtConfig::default(),
            redis: RedisConfig::default(),
            chat: ChatConfig::default(),
            notifier: NotifierConfig::default(),
            queue: QueueConfig {
                backend: backend.to_string(),
            },
            otel: OtelConfig::default(),
        }
    }

    #[test]
    fn test_memory_backend_selected() {
        let queue = create_task_queue(&settings("memory")).unwrap();
        assert_eq!(queue.backend_name(), "memory");
    }

    #[test]
    fn test_redis_backend_is_default() {
        // Client::open does not connect, so this works without a server.
        let queue = create_task_queue(&settings("redis")).unwrap();
        assert_eq!(queue.backend_name(), "redis");

        let queue = create_task_queue(&settings("kafka")).unwrap();
        assert_eq!(queue.backend_name(), "redis");
    }
}
