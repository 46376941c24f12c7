use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user profile. Owned by the external identity service — this core
/// only reads display attributes from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub avatar_ref: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation. `name`, `description` and `avatar_ref` are only
/// meaningful for group chats; readers of a direct chat resolve them
/// from the counterparty's profile instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub is_group: bool,
    pub name: String,
    pub description: String,
    pub avatar_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership edge between a chat and a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub attachment_ref: String,
    pub created_at: DateTime<Utc>,
}
