use axum::{extract::Request, middleware::Next, response::Response};
use chrono::{DateTime, Utc};

use bazaar_types::models::User;

use crate::error::ApiError;
use crate::session::SessionContext;

/// The logged-in caller, inserted by `require_auth`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub session_id: String,
    pub session_expires_at: DateTime<Utc>,
}

/// Reject requests whose session is anonymous, expired or points at a user
/// that no longer exists.
pub async fn require_auth(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let ctx = req
        .extensions()
        .get::<SessionContext>()
        .cloned()
        .unwrap_or_default();

    let (Some(session), Some(user)) = (ctx.session, ctx.user) else {
        return Err(ApiError::Authentication("Not logged in".into()));
    };

    req.extensions_mut().insert(AuthUser {
        user,
        session_id: session.id,
        session_expires_at: session.expires_at,
    });
    Ok(next.run(req).await)
}
