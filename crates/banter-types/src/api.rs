use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared between banter-api (REST middleware) and
/// banter-gateway (WebSocket identify). Tokens are issued by the external
/// authentication service; this backend only validates them. Canonical
/// definition lives here in banter-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDirectChatRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupChatRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar_ref: String,
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: Uuid,
    pub is_group: bool,
    pub name: String,
    pub description: String,
    pub avatar_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participants: Vec<ParticipantResponse>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantResponse {
    pub user_id: Uuid,
    pub username: String,
    pub avatar_ref: String,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

/// The user-relative aggregated view of one chat, as returned by the
/// list endpoint. `name`/`avatar_ref` are already resolved: stored values
/// for groups, the counterparty's current profile for direct chats.
#[derive(Debug, Serialize)]
pub struct ChatSummary {
    pub chat_id: Uuid,
    pub name: String,
    pub avatar_ref: String,
    pub is_group: bool,
    pub last_message: Option<MessageResponse>,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachment_ref: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
    pub attachment_ref: String,
    pub created_at: DateTime<Utc>,
}

// -- Users --

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub avatar_ref: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub username: String,
    #[serde(default)]
    pub avatar_ref: String,
}
