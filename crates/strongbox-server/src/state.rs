use std::sync::Arc;

use anyhow::Context;
use strongbox_store::{Database, StoreError};
use strongbox_shared::ClientId;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::file_store::FileStorage;
use crate::registry::ConnectionRegistry;
use crate::session_store::SessionStore;

/// Everything a connection worker needs, shared behind an `Arc`.
pub struct ServerState {
    pub config: ServerConfig,
    pub db: Database,
    pub sessions: SessionStore,
    pub storage: FileStorage,
    pub registry: Arc<ConnectionRegistry>,
}

impl ServerState {
    pub fn new(config: ServerConfig, db: Database, storage: FileStorage) -> Result<Self, StoreError> {
        let sessions = SessionStore::load(&db)?;
        Ok(Self {
            config,
            db,
            sessions,
            storage,
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    /// Check the storage directory, open the database and warm the session
    /// store. Any failure here should stop the process.
    pub fn open(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let storage = FileStorage::open(&config.storage_dir).with_context(|| {
            format!(
                "storage directory '{}' is unusable",
                config.storage_dir.display()
            )
        })?;

        let db = Database::open_with(&config.database_path, config.store_options())
            .with_context(|| {
                format!(
                    "failed to open database '{}'",
                    config.database_path.display()
                )
            })?;
        info!(
            schema_version = db.schema_version(),
            pool_size = db.pool_size(),
            "Metadata store ready"
        );

        let state = Self::new(config, db, storage).context("failed to load known clients")?;
        Ok(Arc::new(state))
    }

    /// Forget a client everywhere: its row and file rows, its session entry
    /// and its stored bytes. Returns `false` if the client was not stored.
    ///
    /// The session entry is evicted even when the row was already gone.
    pub fn delete_client(&self, id: &ClientId) -> Result<bool, StoreError> {
        let deleted = self.db.delete_client(id)?;
        self.sessions.remove(id);
        if let Err(e) = self.storage.remove_client(id) {
            warn!(client = %id, error = %e, "Could not remove stored files of deleted client");
        }
        if deleted {
            info!(client = %id, "Client deleted");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strongbox_store::NewFile;
    use tempfile::TempDir;

    #[test]
    fn test_delete_client_clears_every_layer() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("meta.db")).unwrap();
        let storage = FileStorage::open(dir.path().join("files")).unwrap();
        let state = ServerState::new(ServerConfig::default(), db, storage).unwrap();

        let id = ClientId::generate();
        state.db.save_client(&id, "olivia", None, None).unwrap();
        state.sessions.insert(state.db.get_client_by_id(&id).unwrap().unwrap().into());
        let path = state.storage.allocate(&id, "notes.txt").unwrap();
        state.storage.create(&path).unwrap();
        let path_str = path.to_string_lossy();
        state
            .db
            .save_file(&NewFile {
                client_id: id,
                filename: "notes.txt",
                path: &path_str,
                size: 0,
                mod_time: Utc::now(),
                crc: None,
                verified: false,
            })
            .unwrap();

        assert!(state.delete_client(&id).unwrap());
        assert!(state.db.get_client_by_id(&id).unwrap().is_none());
        assert!(state.db.list_files_for_client(&id).unwrap().is_empty());
        assert!(state.sessions.get(&id).is_none());
        assert!(!path.exists());

        assert!(!state.delete_client(&id).unwrap());
    }
}
