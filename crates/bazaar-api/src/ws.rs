use axum::{
    Extension,
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use chrono::Utc;

use bazaar_gateway::connection::{self, PushSession};

use crate::middleware::AuthUser;
use crate::state::AppState;

/// `GET /ws`. Sits behind `require_auth`, so the push channel is only ever
/// opened for a logged-in session, and closes when that session ends.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ws: WebSocketUpgrade,
) -> Response {
    let dispatcher = state.dispatcher.clone();
    let session = PushSession {
        user_id: auth.user.id,
        username: auth.user.username,
        expires_in: (auth.session_expires_at - Utc::now()).to_std().unwrap_or_default(),
        session_id: auth.session_id,
    };
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, session))
}
