use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use bazaar_db::Database;
use bazaar_db::models::{SessionRow, format_timestamp, parse_timestamp};
use bazaar_types::models::User;

use crate::config::Config;
use crate::csrf;
use crate::error::ApiError;
use crate::state::{AppState, run_blocking};

pub const SESSION_COOKIE: &str = "bazaar.sid";

/// Server-side session state. The cookie only ever carries `id`.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: Option<Uuid>,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    fn from_row(row: SessionRow) -> anyhow::Result<Self> {
        Ok(Self {
            user_id: row.user_id.as_deref().map(str::parse::<Uuid>).transpose()?,
            expires_at: parse_timestamp(&row.expires_at)?,
            id: row.id,
            csrf_token: row.csrf_token,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What the session middleware resolved for this request.
///
/// `user` is `None` for anonymous sessions and for sessions whose user row
/// has disappeared; both are treated as not logged in.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session: Option<SessionRecord>,
    pub user: Option<User>,
}

impl SessionContext {
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }
}

/// Owns session lifecycle against the `sessions` table.
pub struct SessionManager {
    db: Arc<Database>,
    ttl: chrono::Duration,
}

impl SessionManager {
    pub fn new(db: Arc<Database>, ttl: chrono::Duration) -> Self {
        Self { db, ttl }
    }

    fn new_row(&self, user_id: Option<Uuid>) -> (SessionRow, SessionRecord) {
        let now = Utc::now();
        let record = SessionRecord {
            id: bazaar_crypto::token::random_token(),
            user_id,
            csrf_token: csrf::issue_token(),
            expires_at: now + self.ttl,
        };
        let row = SessionRow {
            id: record.id.clone(),
            user_id: user_id.map(|id| id.to_string()),
            csrf_token: record.csrf_token.clone(),
            created_at: format_timestamp(now),
            expires_at: format_timestamp(record.expires_at),
        };
        (row, record)
    }

    /// Start a new session, anonymous when `user_id` is `None`.
    pub async fn create(&self, user_id: Option<Uuid>) -> Result<SessionRecord, ApiError> {
        let (row, record) = self.new_row(user_id);
        run_blocking(&self.db, move |db| db.insert_session(&row)).await?;
        Ok(record)
    }

    /// Issue a fresh identifier and CSRF token bound to `user_id`, deleting
    /// `old_id` in the same transaction. Completes before any response is built.
    pub async fn regenerate(&self, old_id: Option<&str>, user_id: Uuid) -> Result<SessionRecord, ApiError> {
        let (row, record) = self.new_row(Some(user_id));
        let old_id = old_id.map(str::to_owned);
        run_blocking(&self.db, move |db| db.replace_session(old_id.as_deref(), &row)).await?;
        Ok(record)
    }

    pub async fn destroy(&self, id: &str) -> Result<(), ApiError> {
        let id = id.to_owned();
        run_blocking(&self.db, move |db| db.delete_session(&id)).await?;
        Ok(())
    }

    /// Look a session up. Expired sessions are deleted and reported as absent.
    pub async fn load(&self, id: &str) -> Result<Option<SessionRecord>, ApiError> {
        let lookup = id.to_owned();
        let Some(row) = run_blocking(&self.db, move |db| db.get_session(&lookup)).await? else {
            return Ok(None);
        };

        let record = match SessionRecord::from_row(row) {
            Ok(record) => record,
            Err(e) => {
                debug!("Discarding unreadable session: {}", e);
                self.destroy(id).await?;
                return Ok(None);
            }
        };

        if record.is_expired(Utc::now()) {
            self.destroy(id).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub async fn purge_expired(&self) -> Result<usize, ApiError> {
        let now = format_timestamp(Utc::now());
        run_blocking(&self.db, move |db| db.delete_expired_sessions(&now)).await
    }
}

/// Build the session cookie. `Secure` is set in production, or when a trusted
/// proxy reports the original request came in over HTTPS.
pub fn session_cookie(config: &Config, headers: &HeaderMap, session: &SessionRecord) -> Cookie<'static> {
    let max_age = time::Duration::seconds(config.session_ttl.num_seconds());
    Cookie::build((SESSION_COOKIE, session.id.clone()))
        .http_only(true)
        .secure(is_secure(config, headers))
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}

fn is_secure(config: &Config, headers: &HeaderMap) -> bool {
    if config.production {
        return true;
    }
    config.trust_proxy
        && headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Resolve the session cookie into a `SessionContext` request extension.
pub async fn load_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let mut ctx = SessionContext::default();

    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        ctx.session = state.sessions.load(cookie.value()).await?;
    }

    if let Some(user_id) = ctx.session.as_ref().and_then(|s| s.user_id) {
        let row = state.db(move |db| db.get_user_by_id(&user_id.to_string())).await?;
        ctx.user = match row.map(User::try_from).transpose() {
            Ok(user) => user,
            Err(e) => {
                debug!("Session user {} unreadable, treating as anonymous: {}", user_id, e);
                None
            }
        };
    }

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}
