//! Database connection management.
//!
//! The [`Database`] handle owns a bounded pool of independent
//! [`rusqlite::Connection`]s and guarantees that migrations ran before any
//! other operation. It is cheap to clone; every clone shares the same pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;
use crate::pool::{ConnectionPool, PooledConnection};

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Number of pooled connections.
    pub pool_size: usize,
    /// How long an operation waits for a free connection.
    pub acquire_timeout: Duration,
    /// SQLite busy timeout applied to each connection.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            pool_size: 4,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

struct Inner {
    pool: ConnectionPool,
    path: PathBuf,
    schema_version: u32,
}

/// Cloneable handle to the metadata database.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Open (or create) a database at an explicit path with default options.
    pub fn open_at(path: &Path) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open (or create) a database at `path`, run migrations, and fill the
    /// connection pool.
    pub fn open_with(path: &Path, options: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(
            path = %path.display(),
            pool_size = options.pool_size,
            "opening database"
        );

        let mut first = open_connection(path, &options)?;

        // Run schema migrations.
        let schema_version = migrations::run_migrations(&mut first)?;

        let mut connections = Vec::with_capacity(options.pool_size.max(1));
        connections.push(first);
        while connections.len() < options.pool_size {
            connections.push(open_connection(path, &options)?);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                pool: ConnectionPool::new(connections, options.acquire_timeout),
                path: path.to_path_buf(),
                schema_version,
            }),
        })
    }

    /// Check out a connection for a single operation.
    pub(crate) fn conn(&self) -> Result<PooledConnection<'_>> {
        self.inner.pool.acquire()
    }

    /// Return the filesystem path of the open database.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Schema version reached at open time.
    pub fn schema_version(&self) -> u32 {
        self.inner.schema_version
    }

    /// Whether the `files` table carries size / mod_date / crc.
    pub(crate) fn has_file_attributes(&self) -> bool {
        self.inner.schema_version >= migrations::FILE_ATTRIBUTES_VERSION
    }

    pub fn pool_size(&self) -> usize {
        self.inner.pool.size()
    }
}

fn open_connection(path: &Path, options: &StoreOptions) -> Result<Connection> {
    let conn = Connection::open(path)?;

    // Recommended SQLite settings. foreign_keys is per connection.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(options.busy_timeout)?;

    Ok(conn)
}
