//! One worker per accepted socket.
//!
//! The worker owns the socket and its [`ConnectionSession`]. It reads one
//! request at a time, hands it to the state machine on the blocking pool,
//! and writes at most one response before reading the next header.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use strongbox_shared::constants::{REQUEST_HEADER_SIZE, SERVER_VERSION};
use strongbox_shared::{FrameError, RequestHeader, Response, ResponseCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::registry::RegistrationGuard;
use crate::session::{ConnectionSession, Outcome};
use crate::state::ServerState;

/// Serve one connection until the client leaves, the protocol ends it, or
/// shutdown is requested while the connection is idle.
pub async fn serve_connection<S>(
    state: Arc<ServerState>,
    mut stream: S,
    registration: &RegistrationGuard,
    shutdown: CancellationToken,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_timeout = state.config.socket_timeout;
    let greeting = strongbox_shared::build_response(SERVER_VERSION, ResponseCode::Greeting as u16, &[]);
    write_frame(&mut stream, &greeting, io_timeout).await?;

    let mut session = ConnectionSession::new(Arc::clone(&state));

    loop {
        let mut header_buf = [0u8; REQUEST_HEADER_SIZE];
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Shutdown requested, closing idle connection");
                return Ok(());
            }
            read = read_exact(&mut stream, &mut header_buf, io_timeout) => read?,
        }

        let header = RequestHeader::parse(&header_buf)?;

        if !state.config.accepts_version(header.version) {
            warn!(version = header.version, "Unsupported client version");
            send(&mut stream, &Response::GenericServerError, io_timeout).await?;
            return Err(ConnectionError::UnsupportedVersion(header.version));
        }

        let len = match header.check_payload_size(state.config.max_payload_size) {
            Ok(len) => len,
            Err(e @ FrameError::PayloadTooLarge { max, .. }) => {
                warn!(code = header.code, error = %e, "Refusing oversized request");
                send(&mut stream, &Response::PayloadTooLarge { max }, io_timeout).await?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let mut payload = vec![0u8; len];
        read_exact(&mut stream, &mut payload, io_timeout).await?;

        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = session.handle_frame(&header, &payload);
            (session, outcome)
        })
        .await?;
        session = returned;

        if let Some(client) = session.client_id() {
            registration.resolve(client);
        }

        if let Some(response) = outcome.response() {
            send(&mut stream, response, io_timeout).await?;
        }
        if outcome.closes() {
            debug!(phase = session.phase().name(), "Closing connection after response");
            let _ = stream.shutdown().await;
            return Ok(());
        }
    }
}

async fn send<S>(stream: &mut S, response: &Response, io_timeout: Duration) -> Result<(), ConnectionError>
where
    S: AsyncWrite + Unpin,
{
    write_frame(stream, &response.to_frame(SERVER_VERSION), io_timeout).await
}

async fn write_frame<S>(stream: &mut S, frame: &[u8], io_timeout: Duration) -> Result<(), ConnectionError>
where
    S: AsyncWrite + Unpin,
{
    tokio::time::timeout(io_timeout, async {
        stream.write_all(frame).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| ConnectionError::Timeout(io_timeout))??;
    Ok(())
}

/// Fill `buf` completely. EOF at any point ends the connection.
async fn read_exact<S>(stream: &mut S, buf: &mut [u8], io_timeout: Duration) -> Result<(), ConnectionError>
where
    S: AsyncRead + Unpin,
{
    match tokio::time::timeout(io_timeout, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => Err(ConnectionError::Closed),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ConnectionError::Timeout(io_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongbox_shared::constants::RESPONSE_HEADER_SIZE;
    use strongbox_shared::frame::encode_name;
    use strongbox_shared::{build_request, ClientId, ResponseHeader};
    use strongbox_store::Database;
    use tempfile::TempDir;
    use tokio::io::DuplexStream;

    use crate::config::ServerConfig;
    use crate::file_store::FileStorage;
    use crate::registry::ConnectionRegistry;

    fn test_state(config: ServerConfig) -> (Arc<ServerState>, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("conn.db")).unwrap();
        let storage = FileStorage::open(dir.path().join("files")).unwrap();
        (Arc::new(ServerState::new(config, db, storage).unwrap()), dir)
    }

    async fn read_response(client: &mut DuplexStream) -> (ResponseHeader, Vec<u8>) {
        let mut head = [0u8; RESPONSE_HEADER_SIZE];
        client.read_exact(&mut head).await.unwrap();
        let header = ResponseHeader::parse(&head).unwrap();
        let mut payload = vec![0u8; header.payload_size as usize];
        client.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }

    fn spawn_worker(
        state: Arc<ServerState>,
        server: DuplexStream,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), ConnectionError>> {
        let registry = Arc::new(ConnectionRegistry::new());
        tokio::spawn(async move {
            let guard = registry.register(([127, 0, 0, 1], 9).into());
            serve_connection(state, server, &guard, shutdown).await
        })
    }

    #[tokio::test]
    async fn test_greeting_then_register() {
        let (state, _dir) = test_state(ServerConfig::default());
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let worker = spawn_worker(state, server, CancellationToken::new());

        let (greeting, payload) = read_response(&mut client).await;
        assert_eq!(greeting.code, 0);
        assert_eq!(greeting.version, SERVER_VERSION);
        assert!(payload.is_empty());

        let frame = build_request(ClientId::default(), 3, 1025, &encode_name("alice"));
        client.write_all(&frame).await.unwrap();
        let (header, payload) = read_response(&mut client).await;
        assert_eq!(header.code, ResponseCode::RegisterOk as u16);
        assert_eq!(payload.len(), 16);

        drop(client);
        assert!(matches!(worker.await.unwrap(), Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_bad_version_closes_before_payload() {
        let (state, _dir) = test_state(ServerConfig::default());
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let worker = spawn_worker(state, server, CancellationToken::new());
        read_response(&mut client).await;

        // header only: the payload is never sent
        let header = RequestHeader::new(ClientId::default(), 99, 1025, 255);
        client.write_all(&header.to_bytes()).await.unwrap();

        let (resp, _) = read_response(&mut client).await;
        assert_eq!(resp.code, ResponseCode::GenericServerError as u16);
        assert!(matches!(
            worker.await.unwrap(),
            Err(ConnectionError::UnsupportedVersion(99))
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_answered_with_cap() {
        let (state, _dir) = test_state(ServerConfig::default());
        let max = state.config.max_payload_size;
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let worker = spawn_worker(state, server, CancellationToken::new());
        read_response(&mut client).await;

        let header = RequestHeader::new(ClientId::default(), 3, 1028, max + 1);
        client.write_all(&header.to_bytes()).await.unwrap();

        let (resp, payload) = read_response(&mut client).await;
        assert_eq!(resp.code, ResponseCode::PayloadTooLarge as u16);
        assert_eq!(payload, max.to_le_bytes());
        assert!(matches!(
            worker.await.unwrap(),
            Err(ConnectionError::Frame(FrameError::PayloadTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let (state, _dir) = test_state(ServerConfig::default());
        let (mut client, server) = tokio::io::duplex(1024);
        let shutdown = CancellationToken::new();
        let worker = spawn_worker(state, server, shutdown.clone());
        read_response(&mut client).await;

        shutdown.cancel();
        assert!(worker.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let config = ServerConfig {
            socket_timeout: Duration::from_secs(2),
            ..ServerConfig::default()
        };
        let (state, _dir) = test_state(config);
        let (mut client, server) = tokio::io::duplex(1024);
        let worker = spawn_worker(state, server, CancellationToken::new());
        read_response(&mut client).await;

        // half a header, then silence
        client.write_all(&[0u8; 10]).await.unwrap();
        assert!(matches!(
            worker.await.unwrap(),
            Err(ConnectionError::Timeout(_))
        ));
    }
}
