use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ClientError;
use crate::transport::Transport;

/// Process-wide CSRF token slot.
///
/// The lock is held across the fetch, so callers that arrive while a fetch is
/// in flight wait for it and reuse its token instead of issuing their own.
#[derive(Default)]
pub struct CsrfTokenCache {
    token: Mutex<Option<String>>,
}

impl CsrfTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get<T: Transport>(&self, transport: &T) -> Result<String, ClientError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }

        debug!("Fetching CSRF token");
        let token = transport.fetch_csrf_token().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Forget the cached token; the next `get` fetches a fresh one.
    pub async fn invalidate(&self) {
        self.token.lock().await.take();
    }
}
