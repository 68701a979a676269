//! Accept loop, admission control and graceful shutdown.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::connection::serve_connection;
use crate::error::ConnectionError;
use crate::state::ServerState;

pub struct Server {
    state: Arc<ServerState>,
    listener: TcpListener,
    limiter: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Server {
    pub async fn bind(state: Arc<ServerState>) -> io::Result<Self> {
        let listener = TcpListener::bind(state.config.listen_addr).await?;
        let limiter = Arc::new(Semaphore::new(state.config.max_clients));
        info!(
            addr = %listener.local_addr()?,
            max_clients = state.config.max_clients,
            "Listening"
        );
        Ok(Self {
            state,
            listener,
            limiter,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Cancelling this token stops the accept loop and starts shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the shutdown token is cancelled, then drain workers.
    pub async fn run(self) -> io::Result<()> {
        let Server {
            state,
            listener,
            limiter,
            shutdown,
        } = self;
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            // Usually fd exhaustion; back off instead of spinning.
                            warn!(error = %e, "Accept failed");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };

                    let permit = match Arc::clone(&limiter).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(
                                peer = %peer,
                                limit = state.config.max_clients,
                                "Connection limit reached, rejecting"
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "Could not set TCP_NODELAY");
                    }

                    let registration = state.registry.register(peer);
                    let span = info_span!("conn", id = registration.id(), peer = %peer);
                    let worker_state = Arc::clone(&state);
                    let token = shutdown.child_token();

                    workers.spawn(
                        async move {
                            let _permit = permit;
                            debug!("Connection accepted");
                            match serve_connection(worker_state, stream, &registration, token).await {
                                Ok(()) => debug!("Connection finished"),
                                Err(ConnectionError::Closed) => debug!("Client disconnected"),
                                Err(e) => warn!(error = %e, "Connection ended with error"),
                            }
                        }
                        .instrument(span),
                    );
                }

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    log_worker_exit(joined);
                }
            }
        }

        drop(listener);
        let grace = state.config.shutdown_grace;
        info!(active = workers.len(), grace = ?grace, "Shutting down");

        let drain = async {
            while let Some(joined) = workers.join_next().await {
                log_worker_exit(joined);
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            for (id, entry) in state.registry.snapshot() {
                warn!(
                    conn = id,
                    peer = %entry.peer,
                    client = ?entry.client,
                    open_for = ?entry.since.elapsed(),
                    "Forcing connection closed"
                );
            }
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        info!("Server stopped");
        Ok(())
    }
}

fn log_worker_exit(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Connection worker panicked");
        }
    }
}
