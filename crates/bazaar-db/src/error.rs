use thiserror::Error;

/// Failures of the conversation/message store that callers act on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found")]
    NotFound,

    #[error("user is not a participant of this conversation")]
    NotParticipant,

    #[error("user not found")]
    UnknownUser,

    #[error("product not found")]
    UnknownProduct,

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.into())
    }
}
