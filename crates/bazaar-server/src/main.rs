mod cleanup;

use std::net::SocketAddr;

use tracing::{info, warn};

use bazaar_api::{AppStateInner, Config, build_router};
use bazaar_db::Database;
use bazaar_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bazaar_server=debug,bazaar_api=debug,bazaar_gateway=debug,tower_http=debug".into()
            }),
        )
        .init();

    let db = Database::open(&config.db_path)?;
    let addr: SocketAddr = config.bind_address().parse()?;
    let purge_interval = config.session_purge_interval;
    if config.production {
        info!("Production mode: session cookies are Secure");
    }

    let state = AppStateInner::new(db, config, Dispatcher::new())?;
    tokio::spawn(cleanup::run_cleanup_loop(state.clone(), purge_interval));

    let app = build_router(state);

    info!("Bazaar server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
