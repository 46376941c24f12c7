use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A freshly committed message as carried over the gateway. Includes the
/// sender's username so clients can render without an extra profile fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
    pub attachment_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// Ack for a JoinChat command
    JoinConfirmed { chat_id: Uuid },

    /// A new message was posted in a chat room this connection joined
    MessageReceived { message: MessagePayload },

    /// Lightweight signal to every live connection that some chat list
    /// entry changed — clients not viewing the chat refresh their summaries
    ChatListChanged { message: MessagePayload },

    /// A user started typing in a joined room
    TypingStarted {
        chat_id: Uuid,
        user_id: Uuid,
        username: String,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe this connection to a chat room
    JoinChat { chat_id: Uuid },

    /// Unsubscribe this connection from a chat room
    LeaveChat { chat_id: Uuid },

    /// Indicate typing in a chat room
    StartTyping { chat_id: Uuid },
}
