use std::sync::Arc;

use crate::metrics::ChatMetrics;

use super::{
    BroadcastOutcome, ChatError, ChatMessage, HistoryQuery, MessageStore, RoomHub, RoomKey,
};

/// A stored message together with its live fan-out result.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub message: Arc<ChatMessage>,
    pub outcome: BroadcastOutcome,
}

/// Chat use cases: persist-then-broadcast, history and read receipts.
pub struct ChatService {
    store: Arc<dyn MessageStore>,
    hub: Arc<RoomHub>,
    history_default_limit: usize,
}

impl ChatService {
    pub fn new(store: Arc<dyn MessageStore>, hub: Arc<RoomHub>, history_default_limit: usize) -> Self {
        Self {
            store,
            hub,
            history_default_limit,
        }
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    /// Persist `message`, then broadcast it to the room's current subscribers.
    ///
    /// Nothing is broadcast when persistence fails.
    #[tracing::instrument(
        name = "chat.send_message",
        skip(self, message),
        fields(
            module_id = %message.module_id,
            student_id = %message.student_id,
            sender_id = %message.sender_id
        )
    )]
    pub async fn send_message(&self, mut message: ChatMessage) -> Result<SendResult, ChatError> {
        let saved = match self.store.save_message(&message).await {
            Ok(saved) => saved,
            Err(e) => {
                ChatMetrics::record_persist_failure();
                tracing::warn!(error = %e, "Failed to persist chat message");
                return Err(ChatError::Persistence(e));
            }
        };

        message.id = saved.id;
        message.created_at = saved.created_at;

        let message = Arc::new(message);
        let room_id = message.room_id();
        let outcome = self.hub.broadcast(&room_id, Arc::clone(&message));
        ChatMetrics::record_sent();

        tracing::debug!(
            room_id = %room_id,
            message_id = %message.id,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Chat message sent"
        );

        Ok(SendResult { message, outcome })
    }

    /// Room history, newest first. A missing or zero `limit` uses the configured default.
    pub async fn history(
        &self,
        room: &RoomKey,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let limit = match limit {
            Some(limit) if limit > 0 => limit,
            _ => self.history_default_limit,
        };
        let query = HistoryQuery {
            room: room.clone(),
            limit,
            offset: offset.unwrap_or(0),
        };

        Ok(self.store.get_history(&query).await?)
    }

    pub async fn mark_as_read(&self, room: &RoomKey, reader_id: &str) -> Result<u64, ChatError> {
        let updated = self.store.mark_as_read(room, reader_id).await?;
        tracing::debug!(
            room_id = %room.room_id(),
            reader_id = %reader_id,
            updated,
            "Messages marked as read"
        );
        Ok(updated)
    }
}
