//! Per-connection protocol state machine.
//!
//! A [`ConnectionSession`] is owned by exactly one worker. Each request is
//! turned into an [`Outcome`] that tells the worker what to write and whether
//! to keep the connection. Store and file-system calls block, so the worker
//! runs [`ConnectionSession::handle_frame`] on the blocking pool.

use std::sync::Arc;

use chrono::Utc;
use strongbox_shared::constants::{MAX_CRC_RETRIES, MAX_PUBLIC_KEY_SIZE};
use strongbox_shared::crypto::{generate_session_key, rsa_encrypt};
use strongbox_shared::{ClientId, FileChunk, Request, RequestCode, RequestHeader, Response};
use strongbox_store::NewFile;
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, TransferError};
use crate::session_store::SessionEntry;
use crate::state::ServerState;
use crate::transfer::{self, ActiveTransfer, ChunkProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    Registered,
    KeyExchanged,
    Transferring,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Registered => "registered",
            Self::KeyExchanged => "key exchanged",
            Self::Transferring => "transferring",
        }
    }
}

/// What the worker does after a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Write the response and wait for the next request.
    Reply(Response),
    /// Write nothing and wait for the next request.
    NoReply,
    /// Write the response, then close.
    ReplyAndClose(Response),
}

impl Outcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Reply(r) | Self::ReplyAndClose(r) => Some(r),
            Self::NoReply => None,
        }
    }

    pub fn closes(&self) -> bool {
        matches!(self, Self::ReplyAndClose(_))
    }
}

fn close_with_error() -> Outcome {
    Outcome::ReplyAndClose(Response::GenericServerError)
}

pub struct ConnectionSession {
    state: Arc<ServerState>,
    phase: Phase,
    client: Option<ClientId>,
    name: Option<String>,
    transfer: Option<ActiveTransfer>,
}

impl ConnectionSession {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self {
            state,
            phase: Phase::Unauthenticated,
            client: None,
            name: None,
            transfer: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client
    }

    pub fn active_transfer(&self) -> Option<&ActiveTransfer> {
        self.transfer.as_ref()
    }

    /// Decode the payload for `header.code` and run the transition.
    pub fn handle_frame(&mut self, header: &RequestHeader, payload: &[u8]) -> Outcome {
        match Request::decode(header.code, payload) {
            Ok(request) => self.handle(header.client_id, request),
            Err(e) => {
                warn!(code = header.code, error = %e, "Rejecting undecodable request");
                close_with_error()
            }
        }
    }

    pub fn handle(&mut self, header_client: ClientId, request: Request) -> Outcome {
        let code = request.code();

        match self.client {
            None => {
                if !matches!(request, Request::Register { .. } | Request::Reconnect { .. }) {
                    return match self.lookup(&header_client) {
                        Ok(Some(_)) => self.out_of_order(code),
                        Ok(None) => {
                            let e = SessionError::UnknownClient(header_client);
                            warn!(request = code.name(), error = %e, "Closing connection");
                            close_with_error()
                        }
                        Err(e) => {
                            error!(error = %e, "Client lookup failed");
                            close_with_error()
                        }
                    };
                }
            }
            Some(expected) if expected != header_client => {
                let e = SessionError::ClientMismatch {
                    expected,
                    got: header_client,
                };
                warn!(error = %e, "Closing connection");
                return close_with_error();
            }
            Some(_) => {}
        }

        let outcome = match request {
            Request::Register { name } => self.register(name),
            Request::SendPublicKey { name, public_key } => self.send_public_key(name, public_key),
            Request::Reconnect { name } => self.reconnect(header_client, name),
            Request::SendFile(chunk) => self.send_file(chunk),
            Request::CrcOk { filename } => self.crc_ok(filename),
            Request::CrcRetry { filename } => self.crc_retry(filename),
            Request::CrcAbort { filename } => self.crc_abort(filename),
        };

        // Key exchanges already refreshed last-seen through set_client_keys.
        let refreshes = matches!(
            code,
            RequestCode::SendFile | RequestCode::CrcOk | RequestCode::CrcRetry | RequestCode::CrcAbort
        );
        if refreshes && !outcome.closes() {
            self.touch();
        }

        outcome
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    fn register(&mut self, name: String) -> Outcome {
        if self.phase != Phase::Unauthenticated {
            return self.out_of_order(RequestCode::Register);
        }
        if name.is_empty() {
            warn!("Registration refused: empty name");
            return Outcome::Reply(Response::RegisterFail);
        }
        if self.state.sessions.name_taken(&name) {
            info!(name = %name, "Registration refused: name taken");
            return Outcome::Reply(Response::RegisterFail);
        }
        match self.state.db.get_client_by_name(&name) {
            Ok(None) => {}
            Ok(Some(existing)) => {
                info!(name = %name, "Registration refused: name taken");
                self.state.sessions.insert(existing.into());
                return Outcome::Reply(Response::RegisterFail);
            }
            Err(e) => {
                error!(error = %e, "Name lookup failed");
                return Outcome::Reply(Response::RegisterFail);
            }
        }

        let id = ClientId::generate();
        if let Err(e) = self.state.db.save_client(&id, &name, None, None) {
            warn!(name = %name, error = %e, "Registration failed");
            return Outcome::Reply(Response::RegisterFail);
        }
        self.state.sessions.insert(SessionEntry {
            id,
            name: name.clone(),
            public_key: None,
            session_key: None,
            last_seen: Utc::now(),
        });

        info!(client = %id, name = %name, "Client registered");
        self.client = Some(id);
        self.name = Some(name);
        self.phase = Phase::Registered;
        Outcome::Reply(Response::RegisterOk { client_id: id })
    }

    fn send_public_key(&mut self, name: String, public_key: Vec<u8>) -> Outcome {
        let allowed = matches!(self.phase, Phase::Registered | Phase::KeyExchanged);
        let (Some(id), Some(registered), true) = (self.client, self.name.clone(), allowed) else {
            return self.out_of_order(RequestCode::SendPublicKey);
        };
        if name != registered {
            warn!(client = %id, sent = %name, "Public key sent under a different name");
            return close_with_error();
        }
        if public_key.is_empty() || public_key.len() > MAX_PUBLIC_KEY_SIZE {
            let e = SessionError::InvalidPublicKey(format!("{} bytes", public_key.len()));
            warn!(client = %id, error = %e, "Key exchange refused");
            return Outcome::Reply(Response::GenericServerError);
        }

        match self.exchange_key(&id, Some(&public_key), &public_key) {
            Ok(encrypted_key) => {
                info!(client = %id, "Session key issued");
                self.phase = Phase::KeyExchanged;
                Outcome::Reply(Response::PubKeyAesSent {
                    client_id: id,
                    encrypted_key,
                })
            }
            Err(e @ SessionError::UnknownClient(_)) => {
                warn!(error = %e, "Key exchange refused, closing connection");
                close_with_error()
            }
            Err(e) => {
                warn!(client = %id, error = %e, "Key exchange failed");
                Outcome::Reply(Response::GenericServerError)
            }
        }
    }

    fn reconnect(&mut self, id: ClientId, name: String) -> Outcome {
        if self.phase != Phase::Unauthenticated {
            return self.out_of_order(RequestCode::Reconnect);
        }
        let refuse = Outcome::ReplyAndClose(Response::ReconnectFail { client_id: id });

        let entry = match self.lookup(&id) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(error = %SessionError::UnknownClient(id), "Reconnect refused");
                return refuse;
            }
            Err(e) => {
                error!(client = %id, error = %e, "Client lookup failed");
                return Outcome::Reply(Response::GenericServerError);
            }
        };
        if entry.name != name {
            warn!(client = %id, sent = %name, "Reconnect name does not match");
            return refuse;
        }
        let Some(public_key) = entry.public_key.clone() else {
            warn!(client = %id, "Reconnect before any key exchange");
            return refuse;
        };

        match self.exchange_key(&id, None, &public_key) {
            Ok(encrypted_key) => {
                info!(client = %id, name = %entry.name, "Client reconnected");
                self.client = Some(id);
                self.name = Some(entry.name);
                self.phase = Phase::KeyExchanged;
                Outcome::Reply(Response::ReconnectAesSent {
                    client_id: id,
                    encrypted_key,
                })
            }
            Err(SessionError::Crypto(e)) => {
                warn!(client = %id, error = %e, "Stored public key unusable");
                refuse
            }
            Err(e @ SessionError::UnknownClient(_)) => {
                warn!(error = %e, "Reconnect refused");
                refuse
            }
            Err(e) => {
                error!(client = %id, error = %e, "Reconnect failed");
                Outcome::Reply(Response::GenericServerError)
            }
        }
    }

    /// Issue a fresh session key encrypted for `encrypt_for`, and persist it.
    ///
    /// Fails with [`SessionError::UnknownClient`] if the client row was
    /// deleted meanwhile; the stale session entry is dropped with it.
    fn exchange_key(
        &self,
        id: &ClientId,
        new_public_key: Option<&[u8]>,
        encrypt_for: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let session_key = generate_session_key();
        let encrypted = rsa_encrypt(encrypt_for, &session_key)?;
        if !self
            .state
            .db
            .set_client_keys(id, new_public_key, &session_key)?
        {
            self.state.sessions.remove(id);
            return Err(SessionError::UnknownClient(*id));
        }
        self.state.sessions.set_keys(id, new_public_key, &session_key);
        Ok(encrypted)
    }

    // ------------------------------------------------------------------
    // File transfer
    // ------------------------------------------------------------------

    fn send_file(&mut self, chunk: FileChunk) -> Outcome {
        let allowed = matches!(self.phase, Phase::KeyExchanged | Phase::Transferring);
        let (Some(client_id), true) = (self.client, allowed) else {
            return self.out_of_order(RequestCode::SendFile);
        };

        if self.transfer.as_ref().is_some_and(|t| t.awaiting_confirmation()) {
            return self.out_of_order(RequestCode::SendFile);
        }

        if self.transfer.is_none() {
            if let Err(e) = transfer::validate_first(&chunk) {
                return self.protocol_violation(e);
            }
            match self.open_transfer(client_id, &chunk) {
                Ok(t) => {
                    debug!(
                        client = %client_id,
                        file = %t.file_id(),
                        filename = %chunk.filename,
                        size = chunk.content_size,
                        packets = chunk.total_packets,
                        "Transfer started"
                    );
                    self.transfer = Some(t);
                }
                Err(e) => return self.storage_failure(e),
            }
        }

        let Some(active) = self.transfer.as_mut() else {
            return self.out_of_order(RequestCode::SendFile);
        };
        let file_id = active.file_id();
        let content_size = active.content_size();

        let progress = match active.accept(&chunk) {
            Ok(progress) => progress,
            Err(e) if e.is_protocol_violation() => return self.protocol_violation(e),
            Err(e) => return self.storage_failure(e.into()),
        };
        self.phase = Phase::Transferring;

        match progress {
            ChunkProgress::Partial { received } => {
                if let Err(e) = self.state.db.update_file_progress(file_id, received, None) {
                    return self.storage_failure(e.into());
                }
                Outcome::NoReply
            }
            ChunkProgress::Complete { received, crc } => {
                if let Err(e) = self.state.db.update_file_progress(file_id, received, Some(crc)) {
                    return self.storage_failure(e.into());
                }
                info!(
                    client = %client_id,
                    filename = %chunk.filename,
                    bytes = received,
                    crc = %format!("{crc:08x}"),
                    "File received"
                );
                Outcome::Reply(Response::FileCrc {
                    client_id,
                    content_size,
                    filename: chunk.filename,
                    crc,
                })
            }
        }
    }

    fn open_transfer(&self, client_id: ClientId, chunk: &FileChunk) -> Result<ActiveTransfer, SessionError> {
        let storage = &self.state.storage;
        let path = storage
            .allocate(&client_id, &chunk.filename)
            .map_err(TransferError::from)?;
        let file = storage.create(&path).map_err(TransferError::from)?;

        let path_str = path.to_string_lossy();
        let saved = self.state.db.save_file(&NewFile {
            client_id,
            filename: &chunk.filename,
            path: &path_str,
            size: 0,
            mod_time: Utc::now(),
            crc: None,
            verified: false,
        });
        let file_id = match saved {
            Ok(id) => id,
            Err(e) => {
                drop(file);
                if let Err(cleanup) = storage.remove(&path) {
                    warn!(error = %cleanup, "Could not remove orphaned file");
                }
                return Err(e.into());
            }
        };

        Ok(ActiveTransfer::begin(file_id, path, file, chunk))
    }

    fn crc_ok(&mut self, filename: String) -> Outcome {
        if let Some(reject) = self.check_pending(&filename, RequestCode::CrcOk, true) {
            return reject;
        }
        let Some(done) = self.transfer.take() else {
            return self.out_of_order(RequestCode::CrcOk);
        };

        if let Err(e) = self.state.db.set_file_verified(done.file_id(), true) {
            return self.storage_failure(e.into());
        }
        info!(
            client = ?self.client,
            file = %done.file_id(),
            filename = %filename,
            retries = done.retries(),
            "File verified"
        );
        self.phase = Phase::KeyExchanged;
        self.ack()
    }

    fn crc_retry(&mut self, filename: String) -> Outcome {
        if let Some(reject) = self.check_pending(&filename, RequestCode::CrcRetry, true) {
            return reject;
        }
        let Some(active) = self.transfer.as_mut() else {
            return self.out_of_order(RequestCode::CrcRetry);
        };

        let attempt = active.record_retry();
        if attempt > MAX_CRC_RETRIES {
            let fatal = TransferError::RetriesExhausted {
                filename,
                attempts: MAX_CRC_RETRIES,
            };
            error!(client = ?self.client, "{fatal}");
            if let Some(failed) = self.transfer.take() {
                if let Err(e) = self.discard(failed) {
                    error!(error = %e, "Could not clean up failed transfer");
                }
            }
            return close_with_error();
        }

        if let Err(e) = active.rewind() {
            return self.storage_failure(e.into());
        }
        debug!(client = ?self.client, filename = %filename, attempt, "CRC mismatch, expecting resend");
        self.ack()
    }

    fn crc_abort(&mut self, filename: String) -> Outcome {
        if let Some(reject) = self.check_pending(&filename, RequestCode::CrcAbort, false) {
            return reject;
        }
        let Some(aborted) = self.transfer.take() else {
            return self.out_of_order(RequestCode::CrcAbort);
        };

        let file_id = aborted.file_id();
        if let Err(e) = self.discard(aborted) {
            return self.storage_failure(e);
        }
        info!(client = ?self.client, file = %file_id, filename = %filename, "Transfer aborted");
        self.phase = Phase::KeyExchanged;
        self.ack()
    }

    /// `None` when a Crc* request for `filename` may proceed.
    fn check_pending(&self, filename: &str, code: RequestCode, needs_crc: bool) -> Option<Outcome> {
        let Some(active) = self.transfer.as_ref() else {
            return Some(self.out_of_order(code));
        };
        if self.phase != Phase::Transferring || (needs_crc && !active.awaiting_confirmation()) {
            return Some(self.out_of_order(code));
        }
        if active.filename() != filename {
            let e = TransferError::FilenameMismatch {
                expected: active.filename().to_string(),
                got: filename.to_string(),
            };
            warn!(client = ?self.client, request = code.name(), error = %e, "Closing connection");
            return Some(close_with_error());
        }
        None
    }

    /// Remove a transfer's row and bytes.
    fn discard(&self, transfer: ActiveTransfer) -> Result<(), SessionError> {
        let file_id = transfer.file_id();
        let path = transfer.path().to_path_buf();
        drop(transfer);

        self.state.db.delete_file_by_id(file_id)?;
        self.state
            .storage
            .remove(&path)
            .map_err(TransferError::from)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ack(&self) -> Outcome {
        match self.client {
            Some(client_id) => Outcome::Reply(Response::Ack { client_id }),
            None => close_with_error(),
        }
    }

    /// Session store first, then the database.
    fn lookup(&self, id: &ClientId) -> Result<Option<SessionEntry>, SessionError> {
        if let Some(entry) = self.state.sessions.get(id) {
            return Ok(Some(entry));
        }
        match self.state.db.get_client_by_id(id)? {
            Some(client) => {
                let entry = SessionEntry::from(client);
                self.state.sessions.insert(entry.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn touch(&self) {
        let Some(id) = self.client else { return };
        self.state.sessions.touch(&id);
        if let Err(e) = self.state.db.touch_client(&id) {
            warn!(client = %id, error = %e, "Could not refresh last-seen");
        }
    }

    fn out_of_order(&self, code: RequestCode) -> Outcome {
        let e = SessionError::OutOfOrder {
            phase: self.phase.name(),
            request: code.name(),
        };
        warn!(client = ?self.client, error = %e, "Closing connection");
        close_with_error()
    }

    /// The chunk stream is out of sync. The partial row stays unverified.
    fn protocol_violation(&mut self, e: TransferError) -> Outcome {
        warn!(client = ?self.client, error = %e, "Transfer aborted, closing connection");
        self.transfer = None;
        close_with_error()
    }

    /// A store or disk operation failed. Answer and keep the connection.
    fn storage_failure(&mut self, e: SessionError) -> Outcome {
        error!(client = ?self.client, error = %e, "Request failed");
        self.transfer = None;
        if self.client.is_some() && self.phase == Phase::Transferring {
            self.phase = Phase::KeyExchanged;
        }
        Outcome::Reply(Response::GenericServerError)
    }
}
