use axum::{Extension, Json, extract::State, http::StatusCode};
use tracing::info;
use uuid::Uuid;

use bazaar_db::conversations::{Created, NewConversation};
use bazaar_db::{Database, StoreError};
use bazaar_types::api::{CreateConversationRequest, MarkReadResponse};
use bazaar_types::models::Conversation;

use crate::error::ApiError;
use crate::extract::{ConversationId, ValidatedJson};
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Fetch a conversation the caller takes part in.
pub(crate) fn participant_conversation(
    db: &Database,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Conversation, StoreError> {
    let conversation = db.get_conversation(conversation_id)?.ok_or(StoreError::NotFound)?;
    if !conversation.is_participant(user_id) {
        return Err(StoreError::NotParticipant);
    }
    Ok(conversation)
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let user_id = auth.user.id;
    let conversations = state.db(move |db| db.list_conversations(user_id)).await?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ConversationId(conversation_id): ConversationId,
) -> Result<Json<Conversation>, ApiError> {
    let user_id = auth.user.id;
    let conversation = state
        .db(move |db| participant_conversation(db, conversation_id, user_id))
        .await?;
    Ok(Json(conversation))
}

/// `POST /api/conversations`. The caller must be one of the two parties.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    if req.buyer_id == req.seller_id {
        return Err(ApiError::field("sellerId", "Buyer and seller must be different users"));
    }
    if auth.user.id != req.buyer_id && auth.user.id != req.seller_id {
        return Err(ApiError::Authorization(
            "You can only start conversations you take part in".into(),
        ));
    }

    let new = NewConversation {
        buyer_id: req.buyer_id,
        seller_id: req.seller_id,
        product_id: req.product_id,
    };
    let allow_duplicates = state.config.allow_duplicate_conversations;
    let created = state
        .db(move |db| db.create_conversation(&new, allow_duplicates))
        .await?;

    Ok(match created {
        Created::New(conversation) => {
            info!(
                "{} opened conversation {} ({} -> {})",
                auth.user.username, conversation.id, conversation.buyer_id, conversation.seller_id
            );
            (StatusCode::CREATED, Json(conversation))
        }
        Created::Existing(conversation) => (StatusCode::OK, Json(conversation)),
    })
}

/// `POST /api/conversations/:id/read`. Marks the other party's messages read.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ConversationId(conversation_id): ConversationId,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let reader_id = auth.user.id;
    let updated = state
        .db(move |db| db.mark_read(conversation_id, reader_id))
        .await?;
    Ok(Json(MarkReadResponse { updated }))
}
