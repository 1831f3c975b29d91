use std::time::Duration;

use tracing::{debug, info, warn};

use bazaar_api::AppState;

/// Background task that drops expired sessions and spent rate-limit windows.
pub async fn run_cleanup_loop(state: AppState, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        match state.sessions.purge_expired().await {
            Ok(0) => {}
            Ok(count) => info!("Cleanup: purged {} expired sessions", count),
            Err(e) => warn!("Cleanup error: {}", e),
        }

        let pruned = state.rate_limiter.prune();
        if pruned > 0 {
            debug!("Cleanup: pruned {} rate-limit windows", pruned);
        }
    }
}
