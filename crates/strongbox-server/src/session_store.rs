//! In-memory registry of known clients.
//!
//! Warmed from the `clients` table at startup and kept in step with it by the
//! connection workers. Reads are concurrent; a worker only ever writes the
//! entry of the client it has resolved.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use strongbox_shared::ClientId;
use strongbox_store::{Client, Database, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub id: ClientId,
    pub name: String,
    pub public_key: Option<Vec<u8>>,
    pub session_key: Option<Vec<u8>>,
    pub last_seen: DateTime<Utc>,
}

impl From<Client> for SessionEntry {
    fn from(client: Client) -> Self {
        Self {
            id: client.id,
            name: client.name,
            public_key: client.public_key,
            session_key: client.session_key,
            last_seen: client.last_seen,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    entries: RwLock<HashMap<ClientId, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every stored client. Failing here is fatal at startup.
    pub fn load(db: &Database) -> Result<Self, StoreError> {
        let clients = db.list_clients()?;
        let entries = clients
            .into_iter()
            .map(|c| (c.id, SessionEntry::from(c)))
            .collect::<HashMap<_, _>>();

        tracing::info!(clients = entries.len(), "Session store loaded");
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    pub fn get(&self, id: &ClientId) -> Option<SessionEntry> {
        self.entries.read().get(id).cloned()
    }

    pub fn name_taken(&self, name: &str) -> bool {
        self.entries.read().values().any(|e| e.name == name)
    }

    pub fn insert(&self, entry: SessionEntry) {
        self.entries.write().insert(entry.id, entry);
    }

    /// Record new key material. `None` keeps what is stored.
    pub fn set_keys(&self, id: &ClientId, public_key: Option<&[u8]>, session_key: &[u8]) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(id) {
            Some(entry) => {
                if let Some(pk) = public_key {
                    entry.public_key = Some(pk.to_vec());
                }
                entry.session_key = Some(session_key.to_vec());
                entry.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn touch(&self, id: &ClientId) -> bool {
        match self.entries.write().get_mut(id) {
            Some(entry) => {
                entry.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &ClientId) -> Option<SessionEntry> {
        self.entries.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(name: &str) -> SessionEntry {
        SessionEntry {
            id: ClientId::generate(),
            name: name.to_string(),
            public_key: None,
            session_key: None,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn test_load_from_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("s.db")).unwrap();
        let id = ClientId::generate();
        db.save_client(&id, "alice", Some(b"pk"), Some(b"sk")).unwrap();

        let store = SessionStore::load(&db).unwrap();
        assert_eq!(store.len(), 1);
        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded.name, "alice");
        assert_eq!(loaded.session_key.as_deref(), Some(&b"sk"[..]));
        assert!(store.name_taken("alice"));
        assert!(!store.name_taken("bob"));
    }

    #[test]
    fn test_set_keys_keeps_public_key() {
        let store = SessionStore::new();
        let e = entry("carol");
        let id = e.id;
        store.insert(e);

        assert!(store.set_keys(&id, Some(b"pk"), b"k1"));
        assert!(store.set_keys(&id, None, b"k2"));

        let got = store.get(&id).unwrap();
        assert_eq!(got.public_key.as_deref(), Some(&b"pk"[..]));
        assert_eq!(got.session_key.as_deref(), Some(&b"k2"[..]));

        assert!(!store.set_keys(&ClientId::generate(), None, b"k"));
    }

    #[test]
    fn test_touch_and_remove() {
        let store = SessionStore::new();
        let e = entry("dave");
        let id = e.id;
        let before = e.last_seen;
        store.insert(e);

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.touch(&id));
        assert!(store.get(&id).unwrap().last_seen > before);

        assert!(store.remove(&id).is_some());
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let e = entry(&format!("client-{i}"));
                    let id = e.id;
                    store.insert(e);
                    for _ in 0..100 {
                        store.touch(&id);
                        assert!(store.get(&id).is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 8);
    }
}
