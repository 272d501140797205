//! Message persistence collaborator.
//!
//! The chat core only needs three operations from the message store; the SQL
//! implementation lives with the rest of the CRUD backend. `MemoryMessageStore`
//! backs tests and single-process development runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChatMessage, HistoryQuery, RoomKey};

/// Errors reported by a message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("Message store unavailable: {0}")]
    Unavailable(String),

    /// Store refused the message (constraint violation, unknown sender, ...)
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Identity assigned to a message when it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMessage {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message and return its assigned id and timestamp.
    async fn save_message(&self, message: &ChatMessage) -> Result<SavedMessage, StoreError>;

    /// Messages of one room, newest first.
    async fn get_history(&self, query: &HistoryQuery) -> Result<Vec<ChatMessage>, StoreError>;

    /// Flag every unread message in the room not written by `reader_id` as read.
    /// Returns how many messages changed.
    async fn mark_as_read(&self, room: &RoomKey, reader_id: &str) -> Result<u64, StoreError>;
}

/// In-process message store.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    /// Insertion order doubles as chronological order
    messages: RwLock<Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

fn in_room(message: &ChatMessage, room: &RoomKey) -> bool {
    message.module_id == room.module_id && message.student_id == room.student_id
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<SavedMessage, StoreError> {
        let saved = SavedMessage {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };

        let mut stored = message.clone();
        stored.id = saved.id.clone();
        stored.created_at = saved.created_at;
        self.messages.write().await.push(stored);

        Ok(saved)
    }

    async fn get_history(&self, query: &HistoryQuery) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .rev()
            .filter(|m| in_room(m, &query.room))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn mark_as_read(&self, room: &RoomKey, reader_id: &str) -> Result<u64, StoreError> {
        let mut messages = self.messages.write().await;
        let mut updated = 0;
        for message in messages
            .iter_mut()
            .filter(|m| in_room(m, room) && m.sender_id != reader_id && !m.is_read)
        {
            message.is_read = true;
            updated += 1;
        }
        Ok(updated)
    }
}
