//! # strongbox-server
//!
//! Backup daemon binary. Startup order:
//! - tracing (respects `RUST_LOG`)
//! - configuration from the environment
//! - storage directory check, metadata store, session warm-up
//! - accept loop until Ctrl+C or SIGTERM, then graceful shutdown

use tracing::info;
use tracing_subscriber::EnvFilter;

use strongbox_server::{Server, ServerConfig, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,strongbox_server=debug")),
        )
        .init();

    info!("Starting Strongbox backup server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Storage, metadata store and session store (all fatal on failure)
    // -----------------------------------------------------------------------
    let state = tokio::task::spawn_blocking(move || ServerState::open(config)).await??;
    info!(known_clients = state.sessions.len(), "State initialized");

    // -----------------------------------------------------------------------
    // 4. Serve until a shutdown signal arrives
    // -----------------------------------------------------------------------
    let server = Server::bind(state).await?;
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, no longer accepting connections");
        shutdown.cancel();
    });

    server.run().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
