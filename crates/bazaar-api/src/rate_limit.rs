use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window attempt counter keyed by client address.
///
/// Login and register share one instance, so attempts on either count
/// against the same budget.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_attempts: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    /// Count an attempt for `key`. Returns `false` once the window's budget is spent.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = windows.entry(key.to_owned()).or_insert(Window { started: now, count: 0 });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count < self.max_attempts {
            entry.count += 1;
            true
        } else {
            false
        }
    }

    /// Give back an attempt that turned out to succeed.
    pub fn refund(&self, key: &str) {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = windows.get_mut(key) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    /// Drop windows that have run out. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.started) < self.window);
        before - windows.len()
    }
}

/// Client identity for rate limiting: the last `X-Forwarded-For` entry when
/// the proxy is trusted, then the peer address, then `"unknown"`.
///
/// The trusted proxy appends the address it saw, so only the rightmost entry
/// is outside the client's control.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let forwarded = trust_proxy
        .then(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.rsplit(',').map(str::trim).find(|v| !v.is_empty()))
                .map(str::to_owned)
        })
        .flatten();

    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Throttle authentication attempts. Requests that end below 400 are refunded,
/// so only failures consume the budget.
pub async fn limit_auth_attempts(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(req.headers(), peer, state.config.trust_proxy);

    if !state.rate_limiter.allow(&key) {
        warn!("Auth rate limit hit for {} on {}", key, req.uri().path());
        return Err(ApiError::RateLimited);
    }

    let response = next.run(req).await;
    if response.status().as_u16() < 400 {
        state.rate_limiter.refund(&key);
    }
    Ok(response)
}
