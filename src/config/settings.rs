use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::queue::NOTIFICATION_EVENT;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtConfig {
    /// Required by the chat server; the notifier never reads it
    #[serde(default)]
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Capacity of each subscriber mailbox; overflow is dropped per subscriber
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Page size used when a history request omits `limit` or sends 0
    #[serde(default = "default_history_limit")]
    pub history_default_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Number of concurrent workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Queue key the workers pop from
    #[serde(default = "default_event_type")]
    pub event_type: String,
    /// Upper bound on a single blocking pop, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_backoff_initial_delay_ms")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max_delay_ms")]
    pub backoff_max_delay_ms: u64,
    /// Simulated delivery latency of the email handler
    #[serde(default = "default_email_delay_ms")]
    pub email_delay_ms: u64,
    /// Port of the notifier's /health and /metrics listener, bound on `server.host`
    #[serde(default = "default_notifier_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// "redis" (default) or "memory"
    #[serde(default = "default_queue_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_history_limit() -> usize {
    50
}

fn default_concurrency() -> usize {
    5
}

fn default_event_type() -> String {
    NOTIFICATION_EVENT.to_string()
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_backoff_initial_delay_ms() -> u64 {
    500
}

fn default_backoff_max_delay_ms() -> u64 {
    30_000
}

fn default_email_delay_ms() -> u64 {
    1000
}

fn default_notifier_metrics_port() -> u16 {
    9091
}

fn default_queue_backend() -> String {
    "redis".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "lms-realtime".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("redis.url", default_redis_url())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // LMS_JWT__SECRET, LMS_NOTIFIER__CONCURRENCY, LMS_CHAT__MAILBOX_CAPACITY, ...
            .add_source(
                Environment::with_prefix("LMS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chat.mailbox_capacity == 0 {
            return Err(ConfigError::Message(
                "chat.mailbox_capacity must be greater than 0".into(),
            ));
        }
        if self.notifier.concurrency == 0 {
            return Err(ConfigError::Message(
                "notifier.concurrency must be greater than 0".into(),
            ));
        }
        if self.notifier.event_type.is_empty() {
            return Err(ConfigError::Message("notifier.event_type must not be empty".into()));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn notifier_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.notifier.metrics_port)
    }
}

impl QueueConfig {
    /// The memory backend is private to one process; no producer elsewhere can reach it.
    pub fn is_process_local(&self) -> bool {
        self.backend == "memory"
    }
}

impl NotifierConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn email_delay(&self) -> Duration {
        Duration::from_millis(self.email_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            history_default_limit: default_history_limit(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            event_type: default_event_type(),
            poll_timeout_ms: default_poll_timeout_ms(),
            backoff_initial_delay_ms: default_backoff_initial_delay_ms(),
            backoff_max_delay_ms: default_backoff_max_delay_ms(),
            email_delay_ms: default_email_delay_ms(),
            metrics_port: default_notifier_metrics_port(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        Settings {
            server: ServerConfig::default(),
            jwt: JwtConfig {
                secret: "secret".to_string(),
                issuer: None,
                audience: None,
            },
            redis: RedisConfig::default(),
            chat: ChatConfig::default(),
            notifier: NotifierConfig::default(),
            queue: QueueConfig::default(),
            otel: OtelConfig::default(),
        }
    }

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);

        let notifier = NotifierConfig::default();
        assert_eq!(notifier.concurrency, 5);
        assert_eq!(notifier.event_type, "events:notifications");

        let chat = ChatConfig::default();
        assert_eq!(chat.history_default_limit, 50);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut settings = test_settings();
        assert!(settings.validate().is_ok());

        settings.notifier.concurrency = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_mailbox() {
        let mut settings = test_settings();
        settings.chat.mailbox_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_server_addr() {
        let settings = test_settings();
        assert_eq!(settings.server_addr(), "0.0.0.0:8080");
        assert_eq!(settings.notifier_addr(), "0.0.0.0:9091");
    }

    #[test]
    fn test_memory_queue_is_process_local() {
        assert!(!QueueConfig::default().is_process_local());

        let queue = QueueConfig {
            backend: "memory".to_string(),
        };
        assert!(queue.is_process_local());
    }
}
