//! # strongbox-server
//!
//! Server half of the Strongbox backup protocol: accepts TCP connections,
//! registers or re-authenticates clients, hands out RSA-wrapped session keys
//! and receives files in CRC-checked chunks.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! drive the same [`Server`] on an ephemeral port.

pub mod config;
pub mod connection;
pub mod error;
pub mod file_store;
pub mod registry;
pub mod server;
pub mod session;
pub mod session_store;
pub mod state;
pub mod transfer;

pub use config::ServerConfig;
pub use error::{ConnectionError, SessionError, StorageError, TransferError};
pub use server::Server;
pub use state::ServerState;
