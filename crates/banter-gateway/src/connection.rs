use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use uuid::Uuid;

use banter_db::Database;
use banter_types::events::{GatewayCommand, GatewayEvent};

use crate::fanout::Fanout;
use crate::registry::SubscriptionRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket gets to send its Identify command.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, then an
/// event loop that forwards fanout deliveries to the socket and applies
/// join/leave commands to the registry. Teardown unsubscribes the
/// connection from every room exactly once.
pub async fn handle_connection(
    socket: WebSocket,
    registry: SubscriptionRegistry,
    fanout: Fanout,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    let (conn_id, mut user_rx) = registry.register(user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    let Ok(text) = serde_json::to_string(&ready) else {
        registry.disconnect(conn_id);
        return;
    };
    if sender.send(Message::Text(text.into())).await.is_err() {
        registry.disconnect(conn_id);
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward registry deliveries -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let registry_recv = registry.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &registry_recv,
                            &fanout,
                            &db,
                            conn_id,
                            user_id,
                            &username_recv,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.disconnect(conn_id);
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use banter_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    registry: &SubscriptionRegistry,
    fanout: &Fanout,
    db: &Arc<Database>,
    conn_id: Uuid,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::JoinChat { chat_id } => {
            // Joins are gated on chat membership, checked against the
            // store off the async runtime.
            let check_db = db.clone();
            let cid = chat_id.to_string();
            let uid = user_id.to_string();
            let allowed = match spawn_blocking(move || check_db.is_participant(&cid, &uid)).await {
                Ok(Ok(allowed)) => allowed,
                Ok(Err(e)) => {
                    warn!("membership check failed for chat {}: {}", chat_id, e);
                    false
                }
                Err(e) => {
                    warn!("spawn_blocking join error: {}", e);
                    false
                }
            };

            if !allowed {
                warn!("{} ({}) denied join to chat {}", username, user_id, chat_id);
                return;
            }

            info!("{} ({}) joined chat room {}", username, user_id, chat_id);
            if registry.join(conn_id, chat_id) {
                registry.send_to(conn_id, GatewayEvent::JoinConfirmed { chat_id });
            }
        }

        GatewayCommand::LeaveChat { chat_id } => {
            info!("{} ({}) left chat room {}", username, user_id, chat_id);
            registry.leave(conn_id, chat_id);
        }

        GatewayCommand::StartTyping { chat_id } => {
            fanout.typing(chat_id, user_id, username);
        }
    }
}
