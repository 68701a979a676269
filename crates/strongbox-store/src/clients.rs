//! CRUD operations for [`Client`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use strongbox_shared::ClientId;

use crate::database::Database;
use crate::error::Result;
use crate::models::Client;

const CLIENT_COLUMNS: &str = "id, name, public_key, session_key, last_seen";

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert or update a client by id and refresh its last-seen time.
    ///
    /// A `None` key leaves the stored value untouched, so a plain refresh
    /// never erases key material.
    pub fn save_client(
        &self,
        id: &ClientId,
        name: &str,
        public_key: Option<&[u8]>,
        session_key: Option<&[u8]>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO clients (id, name, public_key, last_seen, session_key)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 name        = excluded.name,
                 public_key  = COALESCE(excluded.public_key, clients.public_key),
                 session_key = COALESCE(excluded.session_key, clients.session_key),
                 last_seen   = excluded.last_seen",
            params![
                id.as_bytes().as_slice(),
                name,
                public_key,
                Utc::now().to_rfc3339(),
                session_key,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Store fresh key material for an existing client and refresh last-seen.
    ///
    /// Never inserts. Returns `false` when the client row is gone. A `None`
    /// public key keeps the stored one.
    pub fn set_client_keys(
        &self,
        id: &ClientId,
        public_key: Option<&[u8]>,
        session_key: &[u8],
    ) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE clients SET
                 public_key  = COALESCE(?1, public_key),
                 session_key = ?2,
                 last_seen   = ?3
             WHERE id = ?4",
            params![
                public_key,
                session_key,
                Utc::now().to_rfc3339(),
                id.as_bytes().as_slice(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Refresh last-seen only. Returns `false` if the client is unknown.
    pub fn touch_client(&self, id: &ClientId) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE clients SET last_seen = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.as_bytes().as_slice()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_client_by_id(&self, id: &ClientId) -> Result<Option<Client>> {
        let conn = self.conn()?;
        let client = conn
            .query_row(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1"),
                params![id.as_bytes().as_slice()],
                row_to_client,
            )
            .optional()?;
        Ok(client)
    }

    pub fn get_client_by_name(&self, name: &str) -> Result<Option<Client>> {
        let conn = self.conn()?;
        let client = conn
            .query_row(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE name = ?1"),
                params![name],
                row_to_client,
            )
            .optional()?;
        Ok(client)
    }

    /// All clients, ordered by name. Used to warm the in-memory session store.
    pub fn list_clients(&self) -> Result<Vec<Client>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {CLIENT_COLUMNS} FROM clients ORDER BY name ASC"))?;
        let rows = stmt.query_map([], row_to_client)?;

        let mut clients = Vec::new();
        for row in rows {
            clients.push(row?);
        }
        Ok(clients)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    // ON DELETE CASCADE: the client's files go in the same transaction
    pub fn delete_client(&self, id: &ClientId) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let affected = tx.execute(
            "DELETE FROM clients WHERE id = ?1",
            params![id.as_bytes().as_slice()],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }
}

fn row_to_client(row: &rusqlite::Row<'_>) -> rusqlite::Result<Client> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let name: String = row.get(1)?;
    let public_key: Option<Vec<u8>> = row.get(2)?;
    let session_key: Option<Vec<u8>> = row.get(3)?;
    let last_seen_str: String = row.get(4)?;

    let id = ClientId::from_slice(&id_bytes).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Blob,
            Box::new(crate::StoreError::InvalidClientId(id_bytes.len())),
        )
    })?;
    let last_seen: DateTime<Utc> = DateTime::parse_from_rfc3339(&last_seen_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Client {
        id,
        name,
        public_key,
        session_key,
        last_seen,
    })
}
