use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::csrf::{self, csrf_protect};
use crate::middleware::require_auth;
use crate::rate_limit::limit_auth_attempts;
use crate::session::load_session;
use crate::state::AppState;
use crate::{auth, conversations, messages, ws};

/// Request bodies above this are refused before any handler sees them.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Assemble the HTTP surface.
///
/// Layer order, outermost first: tracing, body limit, session resolution,
/// CSRF check, then per-group auth or rate limiting.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .layer(middleware::from_fn_with_state(state.clone(), limit_auth_attempts));

    let public_routes = Router::new()
        .route("/api/csrf-token", get(csrf::get_csrf_token));

    let protected_routes = Router::new()
        .route("/api/logout", post(auth::logout))
        .route(
            "/api/user",
            get(auth::current_user).patch(auth::update_profile),
        )
        .route("/api/change-password", post(auth::change_password))
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route("/api/conversations/{id}", get(conversations::get_conversation))
        .route("/api/conversations/{id}/read", post(conversations::mark_read))
        .route(
            "/api/conversations/{id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/ws", get(ws::ws_upgrade))
        .layer(middleware::from_fn(require_auth));

    Router::new()
        .merge(auth_routes)
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn(csrf_protect))
        .layer(middleware::from_fn_with_state(state.clone(), load_session))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
