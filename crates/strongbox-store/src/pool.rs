//! Bounded pool of SQLite connections.
//!
//! The pool is a bounded channel of idle handles. [`ConnectionPool::acquire`]
//! takes one out, and the returned [`PooledConnection`] puts it back when it is
//! dropped, whichever path the caller leaves by. Callers hold a handle for
//! one store operation only.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub struct ConnectionPool {
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
    size: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Build a pool from already-configured connections.
    pub fn new(connections: Vec<Connection>, acquire_timeout: Duration) -> Self {
        let size = connections.len();
        let (idle_tx, idle_rx) = crossbeam_channel::bounded(size.max(1));
        for conn in connections {
            // Capacity equals the number of handles, so this never blocks.
            let _ = idle_tx.send(conn);
        }
        Self {
            idle_tx,
            idle_rx,
            size,
            acquire_timeout,
        }
    }

    /// Wait up to the configured timeout for an idle connection.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        match self.idle_rx.recv_timeout(self.acquire_timeout) {
            Ok(conn) => Ok(PooledConnection {
                conn: Some(conn),
                pool: self,
            }),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    pool_size = self.size,
                    timeout = ?self.acquire_timeout,
                    "database pool exhausted"
                );
                Err(StoreError::PoolTimeout(self.acquire_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(StoreError::PoolTimeout(self.acquire_timeout))
            }
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of connections currently sitting idle.
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }
}

/// A connection checked out of the pool. Returned on drop.
pub struct PooledConnection<'a> {
    conn: Option<Connection>,
    pool: &'a ConnectionPool,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = self.pool.idle_tx.try_send(conn);
        }
    }
}
