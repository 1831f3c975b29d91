use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

use bazaar_types::events::PushEvent;

/// Capacity of the shared fan-out channel. A receiver that falls further
/// behind than this skips events; the HTTP store stays authoritative.
const CHANNEL_CAPACITY: usize = 1024;

/// One serialized event plus the routing data needed to filter it per connection.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub conversation_id: Uuid,
    pub participants: [Uuid; 2],
    pub json: Arc<str>,
}

/// Manages all connected clients and fans events out to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection holds a receiver; filtering happens on the connection side.
    broadcast_tx: broadcast::Sender<Envelope>,

    /// conn_id -> registration for every open connection
    connections: RwLock<HashMap<Uuid, Registration>>,
}

struct Registration {
    user_id: Uuid,
    session_id: String,
    close_tx: oneshot::Sender<()>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the fan-out channel. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event for a conversation with the given participants.
    ///
    /// Best-effort: connections that are closed, lagging, or not subscribed
    /// simply miss it. Returns the number of receivers it was handed to.
    pub fn publish(&self, event: &PushEvent, participants: [Uuid; 2]) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize push event: {}", e);
                return 0;
            }
        };

        let envelope = Envelope {
            conversation_id: event.conversation_id(),
            participants,
            json: json.into(),
        };
        let delivered = self.inner.broadcast_tx.send(envelope).unwrap_or(0);
        debug!("Published event to {} receivers", delivered);
        delivered
    }

    /// Register an open connection opened under `session_id`. Returns its
    /// connection id and a receiver that fires when the session ends.
    pub async fn register(&self, user_id: Uuid, session_id: &str) -> (Uuid, oneshot::Receiver<()>) {
        let conn_id = Uuid::new_v4();
        let (close_tx, close_rx) = oneshot::channel();
        self.inner.connections.write().await.insert(
            conn_id,
            Registration {
                user_id,
                session_id: session_id.to_owned(),
                close_tx,
            },
        );
        (conn_id, close_rx)
    }

    /// Forget a connection. Nothing about it is kept for reconnects.
    pub async fn unregister(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Close every connection opened under `session_id`. Returns how many were signalled.
    pub async fn disconnect_session(&self, session_id: &str) -> usize {
        let mut connections = self.inner.connections.write().await;
        let ended: Vec<Uuid> = connections
            .iter()
            .filter(|(_, reg)| reg.session_id == session_id)
            .map(|(conn_id, _)| *conn_id)
            .collect();

        for conn_id in &ended {
            if let Some(reg) = connections.remove(conn_id) {
                info!("Closing push connection {} of user {}", conn_id, reg.user_id);
                let _ = reg.close_tx.send(());
            }
        }
        ended.len()
    }

    pub async fn connected_clients(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

/// Per-connection view: who is on the other end and which conversations they joined.
#[derive(Debug)]
pub struct Subscriptions {
    user_id: Uuid,
    conversations: HashSet<Uuid>,
}

impl Subscriptions {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            conversations: HashSet::new(),
        }
    }

    pub fn join(&mut self, conversation_id: Uuid) -> bool {
        self.conversations.insert(conversation_id)
    }

    pub fn leave(&mut self, conversation_id: Uuid) -> bool {
        self.conversations.remove(&conversation_id)
    }

    /// Deliver only to participants who joined the conversation. Joining a
    /// conversation you are not part of is harmless: it never matches.
    pub fn should_deliver(&self, envelope: &Envelope) -> bool {
        envelope.participants.contains(&self.user_id)
            && self.conversations.contains(&envelope.conversation_id)
    }
}
