use uuid::Uuid;

use banter_types::events::{GatewayEvent, MessagePayload};

use crate::registry::SubscriptionRegistry;

/// Push delivery for committed messages: the full message goes to every
/// connection subscribed to the chat's room, and a lightweight
/// list-changed signal goes to every live connection so clients not
/// viewing the chat can refresh their summaries.
///
/// Delivery is best-effort, at-most-once. Senders are snapshotted before
/// delivery and each send is non-blocking, so one slow or vanished
/// connection cannot stall the others; a disconnected client catches up
/// through its next list/history fetch.
#[derive(Clone)]
pub struct Fanout {
    registry: SubscriptionRegistry,
}

impl Fanout {
    pub fn new(registry: SubscriptionRegistry) -> Self {
        Self { registry }
    }

    /// Called after a message commit. Callers invoke this while the store
    /// still serializes them, which keeps per-chat delivery in commit
    /// order.
    pub fn broadcast(&self, chat_id: Uuid, message: MessagePayload) {
        for tx in self.registry.room_senders(chat_id) {
            let _ = tx.send(GatewayEvent::MessageReceived {
                message: message.clone(),
            });
        }
        for tx in self.registry.all_senders() {
            let _ = tx.send(GatewayEvent::ChatListChanged {
                message: message.clone(),
            });
        }
    }

    /// Fire-and-forget typing indicator to the chat's room.
    pub fn typing(&self, chat_id: Uuid, user_id: Uuid, username: &str) {
        for tx in self.registry.room_senders(chat_id) {
            let _ = tx.send(GatewayEvent::TypingStarted {
                chat_id,
                user_id,
                username: username.to_string(),
            });
        }
    }
}
