use axum::{Extension, Json, extract::State, http::StatusCode};
use tracing::debug;

use bazaar_types::api::SendMessageRequest;
use bazaar_types::events::PushEvent;
use bazaar_types::models::Message;

use crate::conversations::participant_conversation;
use crate::error::ApiError;
use crate::extract::{ConversationId, ValidatedJson};
use crate::middleware::AuthUser;
use crate::state::AppState;

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ConversationId(conversation_id): ConversationId,
) -> Result<Json<Vec<Message>>, ApiError> {
    let user_id = auth.user.id;
    let messages = state
        .db(move |db| {
            participant_conversation(db, conversation_id, user_id)?;
            db.list_messages(conversation_id)
        })
        .await?;
    Ok(Json(messages))
}

/// Persist a message, then push `new_message` to the participants' joined
/// connections. The push never blocks or fails the request.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ConversationId(conversation_id): ConversationId,
    ValidatedJson(req): ValidatedJson<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let content = req.content.trim().to_owned();
    if content.is_empty() {
        return Err(ApiError::field("content", "Message cannot be blank"));
    }

    let sender_id = auth.user.id;
    let (conversation, message) = state
        .db(move |db| {
            let conversation = participant_conversation(db, conversation_id, sender_id)?;
            let message = db.create_message(conversation_id, sender_id, &content)?;
            Ok::<_, bazaar_db::StoreError>((conversation, message))
        })
        .await?;

    let event = PushEvent::NewMessage {
        message: message.clone(),
    };
    let receivers = state.dispatcher.publish(&event, conversation.participants());
    debug!(
        "Message {} in {} fanned out to {} receiver(s)",
        message.id, conversation_id, receivers
    );

    Ok((StatusCode::CREATED, Json(message)))
}
