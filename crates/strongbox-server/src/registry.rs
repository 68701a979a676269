//! Live connections, keyed by accept sequence number.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use strongbox_shared::ClientId;

#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub peer: SocketAddr,
    pub client: Option<ClientId>,
    pub since: Instant,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted socket. The entry lives as long as the guard.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> RegistrationGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.lock().insert(
            id,
            ConnectionEntry {
                peer,
                client: None,
                since: Instant::now(),
            },
        );
        RegistrationGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<(u64, ConnectionEntry)> {
        let mut list: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }

    fn resolve(&self, id: u64, client: ClientId) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.client = Some(client);
        }
    }

    fn remove(&self, id: u64) {
        self.entries.lock().remove(&id);
    }
}

/// Removes the connection from the registry when dropped.
#[derive(Debug)]
pub struct RegistrationGuard {
    id: u64,
    registry: Arc<ConnectionRegistry>,
}

impl RegistrationGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn resolve(&self, client: ClientId) {
        self.registry.resolve(self.id, client);
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    #[test]
    fn test_guard_removes_entry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = registry.register(peer(1000));
        let b = registry.register(peer(1001));
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);

        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_sets_client() {
        let registry = Arc::new(ConnectionRegistry::new());
        let guard = registry.register(peer(2000));
        let client = ClientId::generate();
        guard.resolve(client);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1.client, Some(client));
        assert_eq!(snapshot[0].1.peer, peer(2000));
    }
}
