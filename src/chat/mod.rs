//! Real-time chat: room registry, fan-out and the persist-then-broadcast use case.

mod hub;
mod message;
mod service;
mod store;

pub use hub::{BroadcastOutcome, HubStatsSnapshot, Mailbox, RoomHub};
pub use message::{Author, ChatMessage, HistoryQuery, RoomKey};
pub use service::{ChatService, SendResult};
pub use store::{MemoryMessageStore, MessageStore, SavedMessage, StoreError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid room: {0}")]
    InvalidRoom(String),

    #[error("Failed to persist message: {0}")]
    Persistence(#[from] StoreError),
}
