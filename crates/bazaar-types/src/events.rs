use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events pushed from server to client over `/ws`.
///
/// Push frames are a cache-invalidation hint: a client that misses one
/// reconciles by re-fetching over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// A message was persisted in a conversation.
    NewMessage { message: Message },
}

impl PushEvent {
    /// The conversation this event belongs to.
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::NewMessage { message } => message.conversation_id,
        }
    }
}

/// Frames sent FROM client TO server over `/ws`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushCommand {
    /// Start receiving events for a conversation.
    JoinConversation {
        #[serde(rename = "conversationId")]
        conversation_id: Uuid,
    },

    /// Stop receiving events for a conversation.
    LeaveConversation {
        #[serde(rename = "conversationId")]
        conversation_id: Uuid,
    },
}
