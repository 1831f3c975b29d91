use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use bazaar_types::events::PushCommand;

use crate::dispatcher::{Dispatcher, Envelope, Subscriptions};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const MAX_MISSED_HEARTBEATS: u8 = 2;

/// The authenticated session a push socket was opened under.
#[derive(Debug, Clone)]
pub struct PushSession {
    pub user_id: Uuid,
    pub username: String,
    pub session_id: String,
    /// Time left on the session at upgrade. The socket closes when it runs out.
    pub expires_in: Duration,
}

/// Handle a WebSocket whose session was authenticated at the HTTP upgrade.
///
/// The connection starts subscribed to nothing; the client opts into
/// conversations with `join_conversation` frames. Nothing survives the
/// socket: on reconnect the client re-joins and re-fetches over HTTP.
/// The socket lives no longer than its session.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, session: PushSession) {
    let PushSession {
        user_id,
        username,
        session_id,
        expires_in,
    } = session;
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut session_closed) = dispatcher.register(user_id, &session_id).await;
    info!(
        "{} ({}) connected to push channel ({} open)",
        username,
        user_id,
        dispatcher.connected_clients().await
    );

    let subscriptions = Arc::new(RwLock::new(Subscriptions::new(user_id)));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut broadcast_rx = dispatcher.subscribe();

    // Forward matching events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        let session_expiry = tokio::time::sleep(expires_in);
        tokio::pin!(session_expiry);

        loop {
            tokio::select! {
                json = next_deliverable(&mut broadcast_rx, &send_subscriptions) => {
                    let Some(json) = json else { break };
                    if sender.send(Message::Text(json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = &mut session_closed => {
                    info!("Session ended, closing push connection {}", conn_id);
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                _ = &mut session_expiry => {
                    info!("Session expired, closing push connection {}", conn_id);
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_HEARTBEATS {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<PushCommand>(&text) {
                    Ok(cmd) => {
                        let mut subs = subscriptions.write().unwrap_or_else(PoisonError::into_inner);
                        apply_command(&mut subs, cmd, &username_recv);
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad frame: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
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

    dispatcher.unregister(conn_id).await;
    info!(
        "{} ({}) disconnected from push channel ({} open)",
        username,
        user_id,
        dispatcher.connected_clients().await
    );
}

/// Wait for the next event this connection should see. `None` once the
/// channel is closed.
async fn next_deliverable(
    rx: &mut broadcast::Receiver<Envelope>,
    subscriptions: &RwLock<Subscriptions>,
) -> Option<Arc<str>> {
    loop {
        match rx.recv().await {
            Ok(envelope) => {
                let deliver = subscriptions
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .should_deliver(&envelope);
                if deliver {
                    return Some(envelope.json);
                }
            }
            Err(RecvError::Lagged(n)) => warn!("Push receiver lagged by {} events", n),
            Err(RecvError::Closed) => return None,
        }
    }
}

fn apply_command(subs: &mut Subscriptions, cmd: PushCommand, username: &str) {
    match cmd {
        PushCommand::JoinConversation { conversation_id } => {
            if subs.join(conversation_id) {
                debug!("{} joined conversation {}", username, conversation_id);
            }
        }
        PushCommand::LeaveConversation { conversation_id } => {
            if subs.leave(conversation_id) {
                debug!("{} left conversation {}", username, conversation_id);
            }
        }
    }
}
