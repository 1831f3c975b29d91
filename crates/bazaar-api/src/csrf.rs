use axum::{
    Extension, Json,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use bazaar_crypto::token::{random_token, tokens_match};
use bazaar_types::api::CsrfTokenResponse;

use crate::error::ApiError;
use crate::router::MAX_BODY_BYTES;
use crate::session::{SessionContext, session_cookie};
use crate::state::AppState;

pub const CSRF_HEADER: &str = "x-csrf-token";

/// Body field consulted when the header is absent.
pub const CSRF_FIELD: &str = "_csrf";

/// Routes that establish a session and therefore cannot already hold a token.
const EXEMPT_PATHS: &[&str] = &["/api/login", "/api/register"];

pub fn issue_token() -> String {
    random_token()
}

/// Safe methods and the session-establishing endpoints skip the check.
pub fn is_exempt(method: &Method, path: &str) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) || EXEMPT_PATHS.contains(&path)
}

/// `true` only when the session holds a token and the presented one matches it.
pub fn validate(ctx: &SessionContext, presented: Option<&str>) -> bool {
    match (ctx.session.as_ref(), presented) {
        (Some(session), Some(presented)) => tokens_match(&session.csrf_token, presented),
        _ => false,
    }
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Reject state-changing requests that do not carry the session's token.
///
/// The token is read from `x-csrf-token`, falling back to a `_csrf` field in a
/// JSON body. The body is buffered for that lookup and handed on unchanged.
pub async fn csrf_protect(req: Request, next: Next) -> Result<Response, ApiError> {
    if is_exempt(req.method(), req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let ctx = req.extensions().get::<SessionContext>().cloned().unwrap_or_default();

    let (req, presented) = match header_token(req.headers()) {
        Some(token) => (req, Some(token)),
        None if is_json(req.headers()) => {
            let (parts, body) = req.into_parts();
            let bytes = to_bytes(body, MAX_BODY_BYTES)
                .await
                .map_err(|_| ApiError::validation("Request body too large"))?;
            let token = serde_json::from_slice::<serde_json::Value>(&bytes)
                .ok()
                .and_then(|v| v.get(CSRF_FIELD)?.as_str().map(str::to_owned));
            (Request::from_parts(parts, Body::from(bytes)), token)
        }
        None => (req, None),
    };

    if !validate(&ctx, presented.as_deref()) {
        warn!(
            "CSRF check failed: {} {} (session: {})",
            req.method(),
            req.uri().path(),
            ctx.session.is_some()
        );
        return Err(ApiError::Authorization("Invalid CSRF token".into()));
    }

    Ok(next.run(req).await)
}

/// `GET /api/csrf-token`. Starts an anonymous session when the caller has none.
pub async fn get_csrf_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Extension(ctx): Extension<SessionContext>,
) -> Result<(CookieJar, Json<CsrfTokenResponse>), ApiError> {
    if let Some(session) = ctx.session {
        return Ok((
            jar,
            Json(CsrfTokenResponse {
                csrf_token: session.csrf_token,
            }),
        ));
    }

    let session = state.sessions.create(None).await?;
    debug!("Started anonymous session");
    let jar = jar.add(session_cookie(&state.config, &headers, &session));

    Ok((
        jar,
        Json(CsrfTokenResponse {
            csrf_token: session.csrf_token,
        }),
    ))
}
