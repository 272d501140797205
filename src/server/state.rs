use std::sync::Arc;
use std::time::Instant;

use crate::auth::JwtValidator;
use crate::chat::{ChatService, MessageStore, RoomHub};
use crate::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub hub: Arc<RoomHub>,
    pub chat: Arc<ChatService>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<dyn MessageStore>) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let hub = Arc::new(RoomHub::new());
        let chat = Arc::new(ChatService::new(
            store,
            hub.clone(),
            settings.chat.history_default_limit,
        ));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            hub,
            chat,
            start_time: Instant::now(),
        }
    }
}
