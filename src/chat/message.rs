use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{Claims, Role};

use super::ChatError;

/// Identity of a chat room: one thread per (module, student) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub module_id: String,
    pub student_id: String,
}

impl RoomKey {
    pub fn new(module_id: impl Into<String>, student_id: impl Into<String>) -> Result<Self, ChatError> {
        let module_id = module_id.into();
        let student_id = student_id.into();

        if module_id.is_empty() {
            return Err(ChatError::InvalidRoom("module_id is required".to_string()));
        }
        if student_id.is_empty() {
            return Err(ChatError::InvalidRoom("student_id is required".to_string()));
        }

        Ok(Self {
            module_id,
            student_id,
        })
    }

    /// Resolve the room an authenticated caller may address.
    ///
    /// Students are always pinned to their own thread; staff must name the student.
    pub fn for_caller(
        claims: &Claims,
        module_id: Option<&str>,
        student_id: Option<&str>,
    ) -> Result<Self, ChatError> {
        let student_id = claims
            .resolve_student_id(student_id)
            .ok_or_else(|| ChatError::InvalidRoom("student_id is required".to_string()))?;
        Self::new(module_id.unwrap_or_default(), student_id)
    }

    /// Registry key, `"{module_id}_{student_id}"`
    pub fn room_id(&self) -> String {
        format!("{}_{}", self.module_id, self.student_id)
    }
}

/// Who is writing, as resolved from the access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl From<&Claims> for Author {
    fn from(claims: &Claims) -> Self {
        Self {
            id: claims.sub.clone(),
            name: claims.display_name().to_string(),
            role: claims.role,
        }
    }
}

/// A chat message as persisted and as sent to every subscriber of its room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub module_id: String,
    pub student_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: Role,
    pub message_text: String,
    pub file_url: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build an unsaved message. `id` and `created_at` are replaced by the store.
    pub fn draft(
        room: &RoomKey,
        author: &Author,
        text: impl Into<String>,
        file_url: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            module_id: room.module_id.clone(),
            student_id: room.student_id.clone(),
            sender_id: author.id.clone(),
            sender_name: author.name.clone(),
            sender_role: author.role,
            message_text: text.into(),
            file_url: file_url.into(),
            is_read: false,
            created_at: Utc::now(),
        }
    }

    pub fn room_id(&self) -> String {
        format!("{}_{}", self.module_id, self.student_id)
    }
}

/// Page of history for one room, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub room: RoomKey,
    pub limit: usize,
    pub offset: usize,
}
