//! Row-to-response projections shared by the handlers.

use tracing::warn;
use uuid::Uuid;

use banter_db::models::{ChatRow, ChatSummaryRow, MessageRow, ParticipantRow, UserRow, parse_ts};
use banter_types::api::{
    ChatResponse, ChatSummary, MessageResponse, ParticipantResponse, UserResponse,
};

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn message_response(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "message id"),
        chat_id: parse_uuid(&row.chat_id, "chat_id"),
        sender_id: parse_uuid(&row.sender_id, "sender_id"),
        sender_username: row.sender_username,
        content: row.content,
        attachment_ref: row.attachment_ref,
        created_at: parse_ts(&row.created_at),
    }
}

pub(crate) fn summary_response(row: ChatSummaryRow) -> ChatSummary {
    ChatSummary {
        chat_id: parse_uuid(&row.chat_id, "chat id"),
        name: row.name,
        avatar_ref: row.avatar_ref,
        is_group: row.is_group,
        last_message: row.last_message.map(message_response),
        unread_count: row.unread_count,
        updated_at: parse_ts(&row.updated_at),
    }
}

pub(crate) fn chat_response(chat: ChatRow, participants: Vec<ParticipantRow>) -> ChatResponse {
    ChatResponse {
        id: parse_uuid(&chat.id, "chat id"),
        is_group: chat.is_group,
        name: chat.name,
        description: chat.description,
        avatar_ref: chat.avatar_ref,
        created_at: parse_ts(&chat.created_at),
        updated_at: parse_ts(&chat.updated_at),
        participants: participants
            .into_iter()
            .map(|p| ParticipantResponse {
                user_id: parse_uuid(&p.user_id, "user id"),
                username: p.username,
                avatar_ref: p.avatar_ref,
                is_admin: p.is_admin,
                joined_at: parse_ts(&p.joined_at),
            })
            .collect(),
    }
}

pub(crate) fn user_response(row: UserRow) -> UserResponse {
    UserResponse {
        id: parse_uuid(&row.id, "user id"),
        username: row.username,
        avatar_ref: row.avatar_ref,
        created_at: parse_ts(&row.created_at),
    }
}
