use std::time::Duration;

use thiserror::Error;

/// Everything a metadata store call can fail with.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the database's parent directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// No pooled connection became free in time.
    #[error("Timed out after {0:?} waiting for a database connection")]
    PoolTimeout(Duration),

    /// A stored client id did not have 16 bytes.
    #[error("Invalid client id of {0} bytes")]
    InvalidClientId(usize),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Result type of every store operation.
pub type Result<T> = std::result::Result<T, StoreError>;
