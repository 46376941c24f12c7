//! Delivery semantics of the fanout path, wired through the store's
//! after-commit hook the way the send-message handler wires it.

use std::sync::Arc;

use banter_db::Database;
use banter_db::models::{fmt_ts, parse_ts};
use banter_gateway::{Fanout, SubscriptionRegistry};
use banter_types::events::{GatewayEvent, MessagePayload};
use chrono::{Duration, TimeZone, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

fn ts(secs: i64) -> String {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    fmt_ts(base + Duration::seconds(secs))
}

fn uid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

fn seed_user(db: &Database, n: u128, name: &str) -> Uuid {
    let id = uid(n);
    db.insert_user(&id.to_string(), name, "", &ts(0)).unwrap();
    id
}

fn drain(rx: &mut UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Persist a message and fan it out from the after-commit hook, exactly
/// as the HTTP send handler does.
fn send(
    db: &Database,
    fanout: &Fanout,
    message_id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    sender_username: &str,
    content: &str,
    at: &str,
) {
    let payload = MessagePayload {
        id: message_id,
        chat_id,
        sender_id,
        sender_username: sender_username.to_string(),
        content: content.to_string(),
        attachment_ref: String::new(),
        created_at: parse_ts(at),
    };
    db.send_message(
        &message_id.to_string(),
        &chat_id.to_string(),
        &sender_id.to_string(),
        content,
        "",
        at,
        || fanout.broadcast(chat_id, payload),
    )
    .unwrap();
}

#[test]
fn room_scoped_delivery_and_global_list_signal() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let alice = seed_user(&db, 1, "alice");
    let bob = seed_user(&db, 2, "bob");
    let carol = seed_user(&db, 3, "carol");

    let chat = db
        .create_direct_chat(&uid(100).to_string(), &alice.to_string(), &bob.to_string(), &ts(1))
        .unwrap();
    let chat_id = Uuid::parse_str(&chat.id).unwrap();

    let registry = SubscriptionRegistry::new();
    let fanout = Fanout::new(registry.clone());

    // Connection A (bob) is viewing the chat; connection B (carol) is not.
    let (conn_a, mut rx_a) = registry.register(bob);
    let (_conn_b, mut rx_b) = registry.register(carol);
    registry.join(conn_a, chat_id);

    send(&db, &fanout, uid(300), chat_id, alice, "alice", "ping", &ts(2));

    let events_a = drain(&mut rx_a);
    assert!(matches!(
        &events_a[..],
        [
            GatewayEvent::MessageReceived { message },
            GatewayEvent::ChatListChanged { .. },
        ] if message.content == "ping" && message.sender_id == alice
    ));

    // The non-subscriber only sees the list-changed signal.
    let events_b = drain(&mut rx_b);
    assert!(matches!(
        &events_b[..],
        [GatewayEvent::ChatListChanged { message }] if message.chat_id == chat_id
    ));
}

#[test]
fn failed_send_produces_no_broadcast() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let alice = seed_user(&db, 1, "alice");
    let bob = seed_user(&db, 2, "bob");
    let carol = seed_user(&db, 3, "carol");

    let chat = db
        .create_direct_chat(&uid(100).to_string(), &alice.to_string(), &bob.to_string(), &ts(1))
        .unwrap();
    let chat_id = Uuid::parse_str(&chat.id).unwrap();

    let registry = SubscriptionRegistry::new();
    let fanout = Fanout::new(registry.clone());
    let (conn_a, mut rx_a) = registry.register(bob);
    registry.join(conn_a, chat_id);

    // Carol is not a participant: the insert fails before the hook runs.
    let payload = MessagePayload {
        id: uid(300),
        chat_id,
        sender_id: carol,
        sender_username: "carol".to_string(),
        content: "intruding".to_string(),
        attachment_ref: String::new(),
        created_at: parse_ts(&ts(2)),
    };
    let err = db
        .send_message(
            &uid(300).to_string(),
            &chat_id.to_string(),
            &carol.to_string(),
            "intruding",
            "",
            &ts(2),
            || fanout.broadcast(chat_id, payload),
        )
        .unwrap_err();

    assert!(matches!(err, banter_db::StoreError::NotParticipant));
    assert!(drain(&mut rx_a).is_empty());
}

#[test]
fn deliveries_within_a_chat_preserve_commit_order() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let alice = seed_user(&db, 1, "alice");
    let bob = seed_user(&db, 2, "bob");

    let chat = db
        .create_direct_chat(&uid(100).to_string(), &alice.to_string(), &bob.to_string(), &ts(1))
        .unwrap();
    let chat_id = Uuid::parse_str(&chat.id).unwrap();

    let registry = SubscriptionRegistry::new();
    let fanout = Fanout::new(registry.clone());
    let (conn, mut rx) = registry.register(bob);
    registry.join(conn, chat_id);

    for i in 0..5u128 {
        send(
            &db,
            &fanout,
            uid(300 + i),
            chat_id,
            alice,
            "alice",
            &format!("m{i}"),
            &ts(2 + i as i64),
        );
    }

    let received: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            GatewayEvent::MessageReceived { message } => Some(message.content),
            _ => None,
        })
        .collect();
    assert_eq!(received, vec!["m0", "m1", "m2", "m3", "m4"]);
}

#[test]
fn leave_stops_room_delivery_but_not_list_signal() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let alice = seed_user(&db, 1, "alice");
    let bob = seed_user(&db, 2, "bob");

    let chat = db
        .create_direct_chat(&uid(100).to_string(), &alice.to_string(), &bob.to_string(), &ts(1))
        .unwrap();
    let chat_id = Uuid::parse_str(&chat.id).unwrap();

    let registry = SubscriptionRegistry::new();
    let fanout = Fanout::new(registry.clone());
    let (conn, mut rx) = registry.register(bob);
    registry.join(conn, chat_id);
    registry.leave(conn, chat_id);

    send(&db, &fanout, uid(300), chat_id, alice, "alice", "ping", &ts(2));

    let events = drain(&mut rx);
    assert!(matches!(
        &events[..],
        [GatewayEvent::ChatListChanged { .. }]
    ));
}

#[test]
fn typing_reaches_only_room_members() {
    let registry = SubscriptionRegistry::new();
    let fanout = Fanout::new(registry.clone());
    let chat_id = uid(100);

    let (conn_a, mut rx_a) = registry.register(uid(1));
    let (_conn_b, mut rx_b) = registry.register(uid(2));
    registry.join(conn_a, chat_id);

    fanout.typing(chat_id, uid(2), "bob");

    assert!(matches!(
        &drain(&mut rx_a)[..],
        [GatewayEvent::TypingStarted { username, .. }] if username == "bob"
    ));
    assert!(drain(&mut rx_b).is_empty());
}
