use std::io;
use std::path::PathBuf;
use std::time::Duration;

use strongbox_shared::{ClientId, CryptoError, FrameError};
use strongbox_store::StoreError;
use thiserror::Error;

/// File-system failures under the storage directory.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("Path traversal detected")]
    PathTraversal,

    #[error("Storage directory '{}' is not writable: {source}", path.display())]
    NotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Problems with an incoming file transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Expected packet {expected}, got {got}")]
    UnexpectedPacket { expected: u16, got: u16 },

    #[error("{content_size} bytes need {expected} packets, client announced {announced}")]
    PacketCount {
        content_size: u32,
        announced: u16,
        expected: u32,
    },

    #[error("Chunk header changed mid-transfer: {0}")]
    HeaderChanged(&'static str),

    #[error("Chunk of {size} bytes exceeds the {max} byte limit")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("Received {received} bytes, more than the announced {content_size}")]
    Overflow { received: u64, content_size: u32 },

    #[error("Last packet left {received} of {content_size} bytes")]
    ShortTransfer { received: u64, content_size: u32 },

    #[error("Request names '{got}' but the pending file is '{expected}'")]
    FilenameMismatch { expected: String, got: String },

    #[error("Fatal error: CRC verification of '{filename}' after {attempts} attempts")]
    RetriesExhausted { filename: String, attempts: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TransferError {
    /// Sequence violations mean the byte stream can no longer be trusted.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Failures while serving one request.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown client {0}")]
    UnknownClient(ClientId),

    #[error("{request} is not allowed while {phase}")]
    OutOfOrder {
        phase: &'static str,
        request: &'static str,
    },

    #[error("Header carries client {got}, connection belongs to {expected}")]
    ClientMismatch { expected: ClientId, got: ClientId },

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Reasons a connection worker stops.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Peer closed the connection")]
    Closed,

    #[error("No data within {0:?}")]
    Timeout(Duration),

    #[error("Unsupported client version {0}")]
    UnsupportedVersion(u8),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Request handler failed: {0}")]
    Handler(#[from] tokio::task::JoinError),
}
