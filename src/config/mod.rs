mod settings;

pub use settings::{
    ChatConfig, JwtConfig, NotifierConfig, OtelConfig, QueueConfig, RedisConfig, ServerConfig,
    Settings,
};
