use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime configuration, read from `BAZAAR_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Production turns on the `Secure` cookie flag unconditionally.
    pub production: bool,
    /// Honor `X-Forwarded-For` / `X-Forwarded-Proto` from a reverse proxy.
    pub trust_proxy: bool,
    /// Fixed lifetime of a session; not renewed on activity.
    pub session_ttl: chrono::Duration,
    pub auth_rate_limit_max: u32,
    pub auth_rate_limit_window: Duration,
    pub allow_duplicate_conversations: bool,
    pub session_purge_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            db_path: PathBuf::from("bazaar.db"),
            production: false,
            trust_proxy: true,
            session_ttl: chrono::Duration::hours(24),
            auth_rate_limit_max: 5,
            auth_rate_limit_window: Duration::from_secs(15 * 60),
            allow_duplicate_conversations: true,
            session_purge_interval: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Load `.env` if present, then read overrides from the environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            host: env_or("BAZAAR_HOST", defaults.host)?,
            port: env_or("BAZAAR_PORT", defaults.port)?,
            db_path: env_or("BAZAAR_DB_PATH", defaults.db_path)?,
            production: env_or("BAZAAR_ENV", "development".to_string())? == "production",
            trust_proxy: env_or("BAZAAR_TRUST_PROXY", defaults.trust_proxy)?,
            session_ttl: chrono::Duration::hours(env_or("BAZAAR_SESSION_TTL_HOURS", 24i64)?),
            auth_rate_limit_max: env_or("BAZAAR_AUTH_RATE_LIMIT_MAX", defaults.auth_rate_limit_max)?,
            auth_rate_limit_window: Duration::from_secs(env_or(
                "BAZAAR_AUTH_RATE_LIMIT_WINDOW_SECS",
                defaults.auth_rate_limit_window.as_secs(),
            )?),
            allow_duplicate_conversations: env_or(
                "BAZAAR_ALLOW_DUPLICATE_CONVERSATIONS",
                defaults.allow_duplicate_conversations,
            )?,
            session_purge_interval: Duration::from_secs(env_or(
                "BAZAAR_SESSION_PURGE_INTERVAL_SECS",
                defaults.session_purge_interval.as_secs(),
            )?),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("Invalid {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}
