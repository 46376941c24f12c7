use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use banter_types::events::GatewayEvent;

struct ConnectionHandle {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct RegistryState {
    conns: HashMap<Uuid, ConnectionHandle>,
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

/// Tracks, per live connection, which chat rooms it is subscribed to.
/// Process-local: a multi-instance deployment fans out between instances
/// through an external pub/sub layer, which is not this registry's job.
///
/// Uses a std RwLock with short critical sections because broadcasts are
/// triggered from blocking storage context; iteration during fanout works
/// on a snapshot of senders taken under the read lock.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// Register a live connection. Returns the connection id and the
    /// receiving end the connection loop drains into its socket.
    pub fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.write().expect("registry lock poisoned");
        state.conns.insert(
            conn_id,
            ConnectionHandle {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Subscribe a connection to a chat room. Idempotent: joining twice
    /// equals joining once. Returns false for a connection that is no
    /// longer registered.
    pub fn join(&self, conn_id: Uuid, chat_id: Uuid) -> bool {
        let mut state = self.inner.write().expect("registry lock poisoned");
        let Some(handle) = state.conns.get_mut(&conn_id) else {
            return false;
        };
        handle.rooms.insert(chat_id);
        state.rooms.entry(chat_id).or_default().insert(conn_id);
        true
    }

    /// Unsubscribe a connection from a room. Leaving a room never joined
    /// is a no-op, not an error.
    pub fn leave(&self, conn_id: Uuid, chat_id: Uuid) {
        let mut state = self.inner.write().expect("registry lock poisoned");
        if let Some(handle) = state.conns.get_mut(&conn_id) {
            handle.rooms.remove(&chat_id);
        }
        if let Some(members) = state.rooms.get_mut(&chat_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                state.rooms.remove(&chat_id);
            }
        }
    }

    /// Drop a connection and remove it from every room it was in. Called
    /// exactly once by the connection loop teardown.
    pub fn disconnect(&self, conn_id: Uuid) {
        let mut state = self.inner.write().expect("registry lock poisoned");
        let Some(handle) = state.conns.remove(&conn_id) else {
            return;
        };
        for chat_id in handle.rooms {
            if let Some(members) = state.rooms.get_mut(&chat_id) {
                members.remove(&conn_id);
                if members.is_empty() {
                    state.rooms.remove(&chat_id);
                }
            }
        }
    }

    /// Send a targeted event to one connection.
    pub fn send_to(&self, conn_id: Uuid, event: GatewayEvent) {
        let state = self.inner.read().expect("registry lock poisoned");
        if let Some(handle) = state.conns.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }

    /// Snapshot of the senders subscribed to a room.
    pub fn room_senders(&self, chat_id: Uuid) -> Vec<mpsc::UnboundedSender<GatewayEvent>> {
        let state = self.inner.read().expect("registry lock poisoned");
        let Some(members) = state.rooms.get(&chat_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|conn_id| state.conns.get(conn_id))
            .map(|handle| handle.tx.clone())
            .collect()
    }

    /// Snapshot of every live connection's sender.
    pub fn all_senders(&self) -> Vec<mpsc::UnboundedSender<GatewayEvent>> {
        let state = self.inner.read().expect("registry lock poisoned");
        state.conns.values().map(|h| h.tx.clone()).collect()
    }

    pub fn user_of(&self, conn_id: Uuid) -> Option<Uuid> {
        let state = self.inner.read().expect("registry lock poisoned");
        state.conns.get(&conn_id).map(|h| h.user_id)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (conn, _rx) = registry.register(Uuid::new_v4());
        let chat = Uuid::new_v4();

        assert!(registry.join(conn, chat));
        assert!(registry.join(conn, chat));
        assert_eq!(registry.room_senders(chat).len(), 1);
    }

    #[test]
    fn leave_of_unjoined_room_is_noop() {
        let registry = SubscriptionRegistry::new();
        let (conn, _rx) = registry.register(Uuid::new_v4());
        let chat = Uuid::new_v4();

        registry.leave(conn, chat);
        assert!(registry.room_senders(chat).is_empty());

        registry.join(conn, chat);
        registry.leave(conn, chat);
        registry.leave(conn, chat);
        assert!(registry.room_senders(chat).is_empty());
    }

    #[test]
    fn disconnect_removes_connection_from_every_room() {
        let registry = SubscriptionRegistry::new();
        let user = Uuid::new_v4();
        let (conn, _rx) = registry.register(user);
        let (chat_a, chat_b) = (Uuid::new_v4(), Uuid::new_v4());

        registry.join(conn, chat_a);
        registry.join(conn, chat_b);
        assert_eq!(registry.user_of(conn), Some(user));

        registry.disconnect(conn);
        assert!(registry.room_senders(chat_a).is_empty());
        assert!(registry.room_senders(chat_b).is_empty());
        assert!(registry.all_senders().is_empty());
        assert_eq!(registry.user_of(conn), None);

        // A second disconnect (or a late join) on the dead id is harmless.
        registry.disconnect(conn);
        assert!(!registry.join(conn, chat_a));
    }

    #[test]
    fn senders_are_scoped_to_their_room() {
        let registry = SubscriptionRegistry::new();
        let (conn_a, _rx_a) = registry.register(Uuid::new_v4());
        let (conn_b, _rx_b) = registry.register(Uuid::new_v4());
        let chat = Uuid::new_v4();

        registry.join(conn_a, chat);
        assert_eq!(registry.room_senders(chat).len(), 1);
        assert_eq!(registry.all_senders().len(), 2);

        registry.join(conn_b, chat);
        assert_eq!(registry.room_senders(chat).len(), 2);
    }
}
