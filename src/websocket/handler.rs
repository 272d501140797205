use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;

use crate::auth::Claims;
use crate::chat::{Author, RoomKey};
use crate::error::AppError;
use crate::server::AppState;

use super::ChatSession;

#[derive(Debug, Deserialize)]
pub struct ChatWsQuery {
    pub module_id: Option<String>,
    pub student_id: Option<String>,
    pub token: Option<String>,
}

/// GET /chat/ws - join the chat room of one (module, student) thread
#[tracing::instrument(
    name = "chat.ws.upgrade",
    skip(ws, state, query, headers),
    fields(module_id = ?query.module_id, has_query_token = query.token.is_some())
)]
pub async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ChatWsQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let claims = state
        .jwt_validator
        .authenticate(query.token.as_deref(), &headers)
        .inspect_err(|e| tracing::warn!(error = %e, "Chat upgrade rejected"))?;

    let room = RoomKey::for_caller(
        &claims,
        query.module_id.as_deref(),
        query.student_id.as_deref(),
    )?;

    tracing::info!(
        user_id = %claims.sub,
        room_id = %room.room_id(),
        "Chat WebSocket upgrade requested"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims, room)))
}

async fn handle_socket(socket: WebSocket, state: AppState, claims: Claims, room: RoomKey) {
    let (sink, stream) = socket.split();
    let session = ChatSession::new(
        state.chat.clone(),
        room,
        Author::from(&claims),
        state.settings.chat.mailbox_capacity,
    );
    session.run(sink, stream).await;
}
