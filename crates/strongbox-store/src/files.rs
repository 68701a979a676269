//! CRUD operations for [`File`] records.
//!
//! On a schema older than v2 the size / mod_date / crc columns do not exist;
//! writes skip them and reads report their defaults.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use strongbox_shared::ClientId;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::{File, NewFile};

const FILE_COLUMNS: &str = "id, client_id, filename, path, verified, size, mod_date, crc";
const FILE_COLUMNS_V1: &str = "id, client_id, filename, path, verified";

impl Database {
    fn file_columns(&self) -> &'static str {
        if self.has_file_attributes() {
            FILE_COLUMNS
        } else {
            FILE_COLUMNS_V1
        }
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new file record. Always returns a fresh id, even when the
    /// client already sent a file with the same name.
    pub fn save_file(&self, file: &NewFile<'_>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if self.has_file_attributes() {
            tx.execute(
                "INSERT INTO files (id, client_id, filename, path, verified, size, mod_date, crc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.to_string(),
                    file.client_id.as_bytes().as_slice(),
                    file.filename,
                    file.path,
                    file.verified as i32,
                    file.size as i64,
                    file.mod_time.to_rfc3339(),
                    file.crc,
                ],
            )?;
        } else {
            tx.execute(
                "INSERT INTO files (id, client_id, filename, path, verified)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    file.client_id.as_bytes().as_slice(),
                    file.filename,
                    file.path,
                    file.verified as i32,
                ],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record the bytes received so far and, once known, the CRC.
    pub fn update_file_progress(&self, id: Uuid, size: u64, crc: Option<u32>) -> Result<bool> {
        if !self.has_file_attributes() {
            return Ok(false);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let affected = tx.execute(
            "UPDATE files SET size = ?1, crc = ?2, mod_date = ?3 WHERE id = ?4",
            params![size as i64, crc, Utc::now().to_rfc3339(), id.to_string()],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }

    pub fn set_file_verified(&self, id: Uuid, verified: bool) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let affected = tx.execute(
            "UPDATE files SET verified = ?1 WHERE id = ?2",
            params![verified as i32, id.to_string()],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_file(&self, id: Uuid) -> Result<Option<File>> {
        let conn = self.conn()?;
        let file = conn
            .query_row(
                &format!("SELECT {} FROM files WHERE id = ?1", self.file_columns()),
                params![id.to_string()],
                row_to_file,
            )
            .optional()?;
        Ok(file)
    }

    pub fn list_files_for_client(&self, client_id: &ClientId) -> Result<Vec<File>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM files WHERE client_id = ?1 ORDER BY filename ASC",
            self.file_columns()
        ))?;
        let rows = stmt.query_map(params![client_id.as_bytes().as_slice()], row_to_file)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete every record of `filename` owned by `client_id`.
    pub fn delete_file(&self, client_id: &ClientId, filename: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let affected = tx.execute(
            "DELETE FROM files WHERE client_id = ?1 AND filename = ?2",
            params![client_id.as_bytes().as_slice(), filename],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }

    // only removes the db record, not the bytes on disk
    pub fn delete_file_by_id(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let affected = tx.execute("DELETE FROM files WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(affected > 0)
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<File> {
    let id_str: String = row.get(0)?;
    let client_bytes: Vec<u8> = row.get(1)?;
    let filename: String = row.get(2)?;
    let path: String = row.get(3)?;
    let verified_int: i32 = row.get(4)?;

    // Columns 5..=7 only exist from schema v2 on.
    let has_attributes = row.as_ref().column_count() > 5;
    let (size, mod_str, crc): (i64, Option<String>, Option<u32>) = if has_attributes {
        (row.get(5)?, row.get(6)?, row.get(7)?)
    } else {
        (0, None, None)
    };

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let client_id = ClientId::from_slice(&client_bytes).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Blob,
            Box::new(crate::StoreError::InvalidClientId(client_bytes.len())),
        )
    })?;
    let mod_time = mod_str
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(File {
        id,
        client_id,
        filename,
        path,
        verified: verified_int != 0,
        size: size.max(0) as u64,
        mod_time,
        crc,
    })
}
