//! Chat history and read-receipt endpoints.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::auth::Claims;
use crate::chat::{ChatMessage, RoomKey};
use crate::error::Result;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub module_id: Option<String>,
    pub student_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_usize")]
    pub limit: Option<usize>,
    #[serde(default, deserialize_with = "lenient_usize")]
    pub offset: Option<usize>,
    pub token: Option<String>,
}

/// Paging values that are empty or not a number count as absent.
fn lenient_usize<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| v.trim().parse().ok()))
}

#[derive(Debug, Deserialize)]
pub struct RoomParams {
    pub module_id: Option<String>,
    pub student_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub room_id: String,
    pub updated: u64,
}

fn authorize(
    state: &AppState,
    token: Option<&str>,
    headers: &HeaderMap,
    module_id: Option<&str>,
    student_id: Option<&str>,
) -> Result<(Claims, RoomKey)> {
    let claims = state.jwt_validator.authenticate(token, headers)?;
    let room = RoomKey::for_caller(&claims, module_id, student_id)?;
    Ok((claims, room))
}

/// GET /chat/history - one page of a room's messages, newest first
pub async fn chat_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>> {
    let (_claims, room) = authorize(
        &state,
        params.token.as_deref(),
        &headers,
        params.module_id.as_deref(),
        params.student_id.as_deref(),
    )?;

    let messages = state.chat.history(&room, params.limit, params.offset).await?;
    Ok(Json(messages))
}

/// POST /chat/read - mark the other side's messages in a room as read
pub async fn mark_read(
    State(state): State<AppState>,
    Query(params): Query<RoomParams>,
    headers: HeaderMap,
) -> Result<Json<MarkReadResponse>> {
    let (claims, room) = authorize(
        &state,
        params.token.as_deref(),
        &headers,
        params.module_id.as_deref(),
        params.student_id.as_deref(),
    )?;

    let updated = state.chat.mark_as_read(&room, claims.user_id()).await?;
    Ok(Json(MarkReadResponse {
        room_id: room.room_id(),
        updated,
    }))
}
