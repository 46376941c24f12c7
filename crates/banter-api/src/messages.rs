use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::task::spawn_blocking;
use tracing::error;
use uuid::Uuid;

use banter_db::models::fmt_ts;
use banter_types::api::{Claims, MessageResponse, SendMessageRequest};
use banter_types::events::MessagePayload;

use crate::convert::message_response;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

/// GET /chats/{chat_id}/messages — a page of history, oldest first.
/// Non-participants get the same 404 as a missing chat.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let cid = chat_id.to_string();
    let user_id = claims.sub.to_string();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = spawn_blocking(move || db.list_messages(&cid, &user_id, limit, before.as_deref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(|e| {
            ApiError::from_store(
                &format!("get_messages chat={chat_id} user={}", claims.sub),
                e,
            )
            .masked()
        })?;

    let messages: Vec<MessageResponse> = rows.into_iter().map(message_response).collect();
    Ok(Json(messages))
}

/// POST /chats/{chat_id}/messages — persist a message, then fan it out.
/// The fanout hook runs after the commit and under the store's
/// serialization, so subscribers see messages in commit order and never
/// before a history fetch would.
pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message_id = Uuid::new_v4();
    let now = Utc::now();

    let payload = MessagePayload {
        id: message_id,
        chat_id,
        sender_id: claims.sub,
        sender_username: claims.username.clone(),
        content: req.content.clone(),
        attachment_ref: req.attachment_ref.clone(),
        created_at: now,
    };

    let db = state.db.clone();
    let fanout = state.fanout.clone();
    let broadcast_payload = payload.clone();
    let mid = message_id.to_string();
    let cid = chat_id.to_string();
    let sender = claims.sub.to_string();
    let now_str = fmt_ts(now);

    spawn_blocking(move || {
        db.send_message(
            &mid,
            &cid,
            &sender,
            &req.content,
            &req.attachment_ref,
            &now_str,
            || fanout.broadcast(chat_id, broadcast_payload),
        )
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })?
    .map_err(|e| {
        ApiError::from_store(
            &format!("send_message chat={chat_id} user={}", claims.sub),
            e,
        )
    })?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: payload.id,
            chat_id: payload.chat_id,
            sender_id: payload.sender_id,
            sender_username: payload.sender_username,
            content: payload.content,
            attachment_ref: payload.attachment_ref,
            created_at: payload.created_at,
        }),
    ))
}
