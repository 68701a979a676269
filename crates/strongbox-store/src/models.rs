//! Domain model structs persisted in the metadata database.
//!
//! Stored records derive `Serialize` and `Deserialize` so administrative
//! tooling can dump them as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strongbox_shared::ClientId;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A registered backup source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Client {
    /// 16-byte identifier assigned at registration.
    pub id: ClientId,
    /// Unique display name.
    pub name: String,
    /// DER-encoded RSA public key, set once the key exchange happened.
    pub public_key: Option<Vec<u8>>,
    /// Most recently negotiated AES session key.
    pub session_key: Option<Vec<u8>>,
    /// Refreshed on every accepted request.
    pub last_seen: DateTime<Utc>,
}

impl Client {
    /// A client may transfer files only after a completed key exchange.
    pub fn has_session(&self) -> bool {
        self.public_key.is_some() && self.session_key.is_some()
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Metadata for one file received from a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct File {
    /// Server-generated identifier, unique per transfer.
    pub id: Uuid,
    /// Owning client.
    pub client_id: ClientId,
    /// Name as sent by the client.
    pub filename: String,
    /// Where the bytes live on disk.
    pub path: String,
    /// Set only after the client confirmed the CRC.
    pub verified: bool,
    /// Bytes received so far.
    pub size: u64,
    /// When the stored bytes were last modified.
    pub mod_time: Option<DateTime<Utc>>,
    /// CRC-32 of the received bytes, once the last chunk arrived.
    pub crc: Option<u32>,
}

/// Fields supplied when a new file record is created.
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub client_id: ClientId,
    pub filename: &'a str,
    pub path: &'a str,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub crc: Option<u32>,
    pub verified: bool,
}
