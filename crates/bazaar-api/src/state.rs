use std::sync::Arc;

use anyhow::Result;
use tracing::error;

use bazaar_db::Database;
use bazaar_gateway::dispatcher::Dispatcher;

use crate::config::Config;
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;
use crate::session::SessionManager;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub config: Config,
    pub sessions: SessionManager,
    pub rate_limiter: RateLimiter,
    pub dispatcher: Dispatcher,
    /// Verified against when a login names an unknown user, so both failure
    /// paths pay for one key derivation.
    pub(crate) dummy_password_hash: String,
}

impl AppStateInner {
    pub fn new(db: Database, config: Config, dispatcher: Dispatcher) -> Result<AppState> {
        let db = Arc::new(db);
        Ok(Arc::new(Self {
            sessions: SessionManager::new(db.clone(), config.session_ttl),
            rate_limiter: RateLimiter::new(config.auth_rate_limit_max, config.auth_rate_limit_window),
            dummy_password_hash: bazaar_crypto::password::hash_password("not-a-real-password")?,
            db,
            config,
            dispatcher,
        }))
    }

    /// Run a blocking DB closure off the async runtime.
    pub async fn db<F, T, E>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<ApiError> + Send + 'static,
    {
        run_blocking(&self.db, f).await
    }
}

pub(crate) async fn run_blocking<F, T, E>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
        })?
        .map_err(Into::into)
}

/// Run CPU-heavy work (password hashing) on the blocking pool.
pub(crate) async fn run_cpu<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
    })
}
