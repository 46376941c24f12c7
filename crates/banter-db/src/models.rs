//! Database row types — these map directly to SQLite rows.
//! Distinct from banter-types API models to keep the DB layer independent.

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

#[derive(Debug)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub avatar_ref: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct ChatRow {
    pub id: String,
    pub is_group: bool,
    pub name: String,
    pub description: String,
    pub avatar_ref: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug)]
pub struct ParticipantRow {
    pub user_id: String,
    pub username: String,
    pub avatar_ref: String,
    pub is_admin: bool,
    pub joined_at: String,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub attachment_ref: String,
    pub created_at: String,
}

/// One row of the per-user chat list: display name/avatar already
/// resolved (stored values for groups, counterparty profile for direct
/// chats), plus last message and unread count.
#[derive(Debug)]
pub struct ChatSummaryRow {
    pub chat_id: String,
    pub is_group: bool,
    pub name: String,
    pub avatar_ref: String,
    pub updated_at: String,
    pub last_message: Option<MessageRow>,
    pub unread_count: i64,
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings with
/// microsecond precision, so lexicographic comparison inside SQL matches
/// chronological order.
pub fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt timestamp '{}': {}", raw, e);
        DateTime::default()
    })
}
