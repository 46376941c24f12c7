use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tokio::task::spawn_blocking;
use tracing::{error, info};
use uuid::Uuid;

use banter_db::StoreError;
use banter_db::models::fmt_ts;
use banter_types::api::{
    ChatSummary, Claims, CreateDirectChatRequest, CreateGroupChatRequest, UserResponse,
};

use crate::convert::{chat_response, summary_response, user_response};
use crate::error::ApiError;
use crate::state::AppState;

/// GET /chats — the caller's chat list, most recent activity first.
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();

    let rows = spawn_blocking(move || db.list_chats(&user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(|e| ApiError::from_store(&format!("list_chats user={}", claims.sub), e))?;

    let summaries: Vec<ChatSummary> = rows.into_iter().map(summary_response).collect();
    Ok(Json(summaries))
}

/// GET /chats/{chat_id} — one summary, as seen by the caller.
/// Non-participants get the same 404 as a missing chat.
pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let cid = chat_id.to_string();
    let user_id = claims.sub.to_string();

    let row = spawn_blocking(move || db.get_chat_summary(&cid, &user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(|e| {
            ApiError::from_store(&format!("get_chat chat={chat_id} user={}", claims.sub), e).masked()
        })?
        .ok_or(ApiError::NotFound("Chat not found or you don't have access"))?;

    Ok(Json(summary_response(row)))
}

/// POST /chats/{chat_id}/read — move the caller's read marker to now.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let cid = chat_id.to_string();
    let user_id = claims.sub.to_string();
    let now = fmt_ts(Utc::now());

    spawn_blocking(move || db.mark_read(&user_id, &cid, &now))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(|e| {
            ApiError::from_store(&format!("mark_read chat={chat_id} user={}", claims.sub), e)
                .masked()
        })?;

    Ok(Json(serde_json::json!({ "message": "Chat marked as read" })))
}

/// GET /chats/contacts — users who share a direct chat with the caller.
pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();

    let rows = spawn_blocking(move || db.list_contacts(&user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(|e| ApiError::from_store(&format!("list_contacts user={}", claims.sub), e))?;

    let users: Vec<UserResponse> = rows.into_iter().map(user_response).collect();
    Ok(Json(users))
}

/// POST /chats/direct — create (or return the existing) direct chat with
/// another user.
pub async fn create_direct_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateDirectChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        "Creating direct chat between {} and {}",
        claims.sub, req.user_id
    );

    let db = state.db.clone();
    let chat_id = Uuid::new_v4();
    let caller = claims.sub.to_string();
    let other = req.user_id.to_string();
    let now = fmt_ts(Utc::now());

    let (chat, participants) = spawn_blocking(move || {
        let chat = db.create_direct_chat(&chat_id.to_string(), &caller, &other, &now)?;
        let participants = db.get_participants(&chat.id)?;
        Ok::<_, StoreError>((chat, participants))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })?
    .map_err(|e| {
        ApiError::from_store(
            &format!("create_direct_chat {} <-> {}", claims.sub, req.user_id),
            e,
        )
    })?;

    Ok((StatusCode::CREATED, Json(chat_response(chat, participants))))
}

/// POST /chats/group — create a group chat; the caller becomes admin.
pub async fn create_group_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        "Creating group chat '{}' for user {}",
        req.name, claims.sub
    );

    let db = state.db.clone();
    let chat_id = Uuid::new_v4();
    let creator = claims.sub.to_string();
    let participant_ids: Vec<String> = req.participant_ids.iter().map(Uuid::to_string).collect();
    let now = fmt_ts(Utc::now());

    let (chat, participants) = spawn_blocking(move || {
        let chat = db.create_group_chat(
            &chat_id.to_string(),
            &creator,
            &req.name,
            &req.description,
            &req.avatar_ref,
            &participant_ids,
            &now,
        )?;
        let participants = db.get_participants(&chat.id)?;
        Ok::<_, StoreError>((chat, participants))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })?
    .map_err(|e| ApiError::from_store(&format!("create_group_chat creator={}", claims.sub), e))?;

    Ok((StatusCode::CREATED, Json(chat_response(chat, participants))))
}
