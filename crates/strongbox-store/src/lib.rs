//! # strongbox-store
//!
//! Durable metadata for the backup server, backed by SQLite.
//!
//! The crate exposes a cloneable [`Database`] handle over a bounded pool of
//! independent `rusqlite::Connection`s and provides typed, transactional CRUD
//! helpers for [`Client`] and [`File`] records. Deleting a client cascades to
//! its files inside the same transaction.

pub mod clients;
pub mod database;
pub mod files;
pub mod migrations;
pub mod models;
pub mod pool;

mod error;

pub use database::{Database, StoreOptions};
pub use error::{Result, StoreError};
pub use models::*;
