//! Redis list backend: LPUSH to enqueue, BRPOP to dequeue.
//!
//! Producers share one multiplexed connection. A blocking pop would stall every
//! other command pipelined on that connection, so each consumer checks out a
//! dedicated connection from a small idle pool for the duration of its BRPOP.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::RwLock;

use crate::config::RedisConfig;
use crate::metrics::TaskMetrics;

use super::{QueueError, Task, TaskQueue};

/// Smallest BRPOP timeout sent to the server; zero would block forever.
const MIN_BLOCK_SECS: f64 = 0.01;

pub struct RedisTaskQueue {
    client: Client,
    /// Shared connection for LPUSH
    producer: RwLock<Option<MultiplexedConnection>>,
    /// Idle dedicated connections for BRPOP
    consumers: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisTaskQueue {
    pub fn new(config: &RedisConfig) -> Result<Self, QueueError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            producer: RwLock::new(None),
            consumers: Mutex::new(Vec::new()),
        })
    }

    async fn producer_connection(&self) -> Result<MultiplexedConnection, QueueError> {
        {
            let conn = self.producer.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut conn_guard = self.producer.write().await;

        // Double-check in case another task connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        let conn = self.client.get_multiplexed_tokio_connection().await?;
        *conn_guard = Some(conn.clone());
        tracing::info!("Redis task queue producer connection established");
        Ok(conn)
    }

    async fn reset_producer(&self) {
        *self.producer.write().await = None;
    }

    async fn checkout_consumer(&self) -> Result<MultiplexedConnection, QueueError> {
        let idle = self
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        match idle {
            Some(conn) => Ok(conn),
            None => {
                let conn = self.client.get_multiplexed_tokio_connection().await?;
                tracing::debug!("Opened dedicated Redis connection for blocking pop");
                Ok(conn)
            }
        }
    }

    fn checkin_consumer(&self, conn: MultiplexedConnection) {
        self.consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }
}

fn is_connection_error(err: &RedisError) -> bool {
    err.is_connection_dropped() || err.is_io_error() || err.is_timeout()
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, event_type: &str, task: &Task) -> Result<(), QueueError> {
        let raw = task.to_json()?;
        let mut conn = self.producer_connection().await?;

        let pushed: Result<i64, RedisError> = conn.lpush(event_type, raw).await;
        match pushed {
            Ok(depth) => {
                TaskMetrics::record_enqueued(event_type);
                tracing::debug!(
                    event_type = %event_type,
                    task_type = %task.kind,
                    depth,
                    "Task enqueued to Redis"
                );
                Ok(())
            }
            Err(e) => {
                if is_connection_error(&e) {
                    self.reset_producer().await;
                }
                Err(QueueError::Redis(e))
            }
        }
    }

    async fn dequeue(&self, event_type: &str, timeout: Duration) -> Result<Option<Task>, QueueError> {
        let mut conn = self.checkout_consumer().await?;
        let block_secs = timeout.as_secs_f64().max(MIN_BLOCK_SECS);

        let reply: Result<Option<(String, String)>, RedisError> = redis::cmd("BRPOP")
            .arg(event_type)
            .arg(block_secs)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(popped) => {
                self.checkin_consumer(conn);
                match popped {
                    Some((_key, raw)) => Task::from_json(&raw).map(Some),
                    None => Ok(None),
                }
            }
            Err(e) => {
                // Broken connections are dropped instead of returned to the pool.
                if !is_connection_error(&e) {
                    self.checkin_consumer(conn);
                }
                Err(QueueError::Redis(e))
            }
        }
    }

    /// PING through the producer connection, resetting it when the link is gone.
    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.producer_connection().await?;
        let pong: Result<String, RedisError> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => Ok(()),
            Err(e) => {
                if is_connection_error(&e) {
                    self.reset_producer().await;
                }
                Err(QueueError::Redis(e))
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        }
    }

    #[test]
    fn test_rejects_invalid_url() {
        let config = RedisConfig {
            url: "not a url".to_string(),
        };
        assert!(RedisTaskQueue::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_ping_unreachable_server_is_transient() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
        };
        let queue = RedisTaskQueue::new(&config).unwrap();

        let err = queue.ping().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_lpush_brpop_round_trip() {
        let queue = RedisTaskQueue::new(&local_config()).unwrap();
        let key = format!("test:tasks:{}", uuid::Uuid::new_v4());

        queue.enqueue(&key, &Task::new_submission("s1")).await.unwrap();
        queue.enqueue(&key, &Task::new_submission("s2")).await.unwrap();

        let first = queue.dequeue(&key, Duration::from_secs(1)).await.unwrap().unwrap();
        let second = queue.dequeue(&key, Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(first.field("student_id"), Some("s1"));
        assert_eq!(second.field("student_id"), Some("s2"));

        let empty = queue.dequeue(&key, Duration::from_millis(100)).await.unwrap();
        assert!(empty.is_none());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_ping() {
        let queue = RedisTaskQueue::new(&local_config()).unwrap();
        queue.ping().await.unwrap();
    }
}
