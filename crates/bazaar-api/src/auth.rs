use axum::{Extension, Json, extract::State, http::{HeaderMap, StatusCode}};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};
use uuid::Uuid;

use bazaar_crypto::password::{hash_password, verify_password};
use bazaar_types::api::{
    ChangePasswordRequest, LoginRequest, RegisterRequest, StatusMessage, UpdateProfileRequest,
};
use bazaar_types::models::User;

use crate::error::ApiError;
use crate::extract::ValidatedJson;
use crate::middleware::AuthUser;
use crate::session::{SessionContext, removal_cookie, session_cookie};
use crate::state::{AppState, run_cpu};

const BAD_CREDENTIALS: &str = "Invalid username or password";

/// Rotate the session onto `user_id` and attach the new cookie.
async fn log_in(
    state: &AppState,
    ctx: &SessionContext,
    headers: &HeaderMap,
    jar: CookieJar,
    user_id: Uuid,
) -> Result<CookieJar, ApiError> {
    let session = state.sessions.regenerate(ctx.session_id(), user_id).await?;
    if let Some(old_id) = ctx.session_id() {
        state.dispatcher.disconnect_session(old_id).await;
    }
    Ok(jar.add(session_cookie(&state.config, headers, &session)))
}

pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<User>), ApiError> {
    let password = req.password;
    let hash = run_cpu(move || hash_password(&password)).await??;

    let user_id = Uuid::new_v4();
    let username = req.username.clone();
    let phone_number = req.phone_number.filter(|p| !p.trim().is_empty());

    let row = state
        .db(move |db| -> anyhow::Result<_> {
            let id = user_id.to_string();
            if !db.create_user(&id, &username, &hash, phone_number.as_deref())? {
                return Ok(None);
            }
            db.get_user_by_id(&id)
        })
        .await?;

    let Some(row) = row else {
        return Err(ApiError::Conflict("Username is already taken".into()));
    };
    let user = User::try_from(row)?;

    let jar = log_in(&state, &ctx, &headers, jar, user.id).await?;
    info!("Registered user {} ({})", user.username, user.id);

    Ok((StatusCode::CREATED, jar, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<(CookieJar, Json<User>), ApiError> {
    let username = req.username.clone();
    let row = state.db(move |db| db.get_user_by_username(&username)).await?;

    // Unknown users still pay for one verification.
    let stored = match &row {
        Some(row) => row.password.clone(),
        None => state.dummy_password_hash.clone(),
    };
    let password = req.password;
    let verified = run_cpu(move || verify_password(&password, &stored)).await?;

    let row = match row {
        Some(row) if verified => row,
        _ => {
            warn!("Failed login for '{}'", req.username);
            return Err(ApiError::Authentication(BAD_CREDENTIALS.into()));
        }
    };
    let user = User::try_from(row)?;

    let jar = log_in(&state, &ctx, &headers, jar, user.id).await?;
    info!("{} logged in", user.username);

    Ok((jar, Json(user)))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<StatusMessage>), ApiError> {
    state.sessions.destroy(&auth.session_id).await?;
    let closed = state.dispatcher.disconnect_session(&auth.session_id).await;
    info!("{} logged out, {} push connection(s) closed", auth.user.username, closed);

    Ok((jar.remove(removal_cookie()), Json(StatusMessage::new("Logged out"))))
}

pub async fn current_user(Extension(auth): Extension<AuthUser>) -> Json<User> {
    Json(auth.user)
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let user_id = auth.user.id.to_string();

    let lookup = user_id.clone();
    let row = state
        .db(move |db| db.get_user_by_id(&lookup))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let current = req.current_password;
    let stored = row.password;
    if !run_cpu(move || verify_password(&current, &stored)).await? {
        return Err(ApiError::Authentication("Current password is incorrect".into()));
    }

    let new_password = req.new_password;
    let hash = run_cpu(move || hash_password(&new_password)).await??;
    if !state.db(move |db| db.update_user_password(&user_id, &hash)).await? {
        return Err(ApiError::NotFound("User not found".into()));
    }

    info!("{} changed their password", auth.user.username);
    Ok(Json(StatusMessage::new("Password changed")))
}

/// `PATCH /api/user`. Only `phoneNumber` is writable; a blank value clears it.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<Json<User>, ApiError> {
    if req.is_empty() {
        return Err(ApiError::validation("No updatable fields provided"));
    }
    let phone_number = req
        .phone_number
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty());

    let user_id = auth.user.id.to_string();
    let row = state
        .db(move |db| db.update_user_phone(&user_id, phone_number.as_deref()))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(User::try_from(row)?))
}
