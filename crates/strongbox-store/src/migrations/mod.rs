//! Database migration runner.
//!
//! Migrations are executed in order when a [`Database`](crate::Database) is
//! opened. Each one is guarded by the `user_version` pragma so it runs exactly
//! once, and runs inside its own transaction so a failed step leaves the
//! previous schema untouched.
//!
//! Every step after v001 is additive. If one fails, the runner logs it and
//! stops at the last good version instead of aborting; the store then works
//! with whatever that schema supports.

pub mod v001_initial;
pub mod v002_file_attributes;
pub mod v003_file_index;

use rusqlite::{Connection, Transaction};

use crate::error::{Result, StoreError};

/// Current schema version.  Bump this and add a new migration module whenever
/// the schema changes.
pub const CURRENT_VERSION: u32 = 3;

/// First version whose `files` table carries size, mod_date and crc.
pub const FILE_ATTRIBUTES_VERSION: u32 = 2;

type Step = fn(&Transaction<'_>) -> std::result::Result<(), rusqlite::Error>;

const STEPS: [(u32, &str, Step); 3] = [
    (1, "v001_initial", v001_initial::up),
    (2, "v002_file_attributes", v002_file_attributes::up),
    (3, "v003_file_index", v003_file_index::up),
];

/// Read the on-disk schema version.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Run all pending migrations and return the version the schema ended on.
pub fn run_migrations(conn: &mut Connection) -> Result<u32> {
    let mut current = schema_version(conn)?;

    tracing::info!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current > CURRENT_VERSION {
        tracing::warn!(
            current_version = current,
            "database schema is newer than this build, running without migrating"
        );
        return Ok(current);
    }

    for (version, name, up) in STEPS {
        if current >= version {
            continue;
        }

        tracing::info!(migration = name, "applying migration");
        match apply(conn, version, up) {
            Ok(()) => current = version,
            Err(e) if version == 1 => {
                return Err(StoreError::Migration(format!("{name}: {e}")));
            }
            Err(e) => {
                tracing::warn!(
                    migration = name,
                    error = %e,
                    schema_version = current,
                    "migration failed, continuing on the previous schema"
                );
                break;
            }
        }
    }

    Ok(current)
}

fn apply(conn: &mut Connection, version: u32, up: Step) -> std::result::Result<(), rusqlite::Error> {
    let tx = conn.transaction()?;
    up(&tx)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()
}

/// True if `table` already has a column named `column`.
pub(crate) fn has_column(
    conn: &Connection,
    table: &str,
    column: &str,
) -> std::result::Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Utc;
    use strongbox_shared::ClientId;

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&mut conn).unwrap(), CURRENT_VERSION);
        assert!(has_column(&conn, "files", "crc").unwrap());

        // Second run is a no-op.
        assert_eq!(run_migrations(&mut conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_upgrade_from_v1_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        let client = ClientId::generate();

        {
            let mut conn = Connection::open(&path).unwrap();
            apply(&mut conn, 1, v001_initial::up).unwrap();
            conn.execute(
                "INSERT INTO clients (id, name, last_seen) VALUES (?1, 'old', ?2)",
                rusqlite::params![client.as_bytes().as_slice(), Utc::now().to_rfc3339()],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO files (id, client_id, filename, path, verified)
                 VALUES (?1, ?2, 'notes.txt', '/x', 1)",
                rusqlite::params![
                    uuid::Uuid::new_v4().to_string(),
                    client.as_bytes().as_slice()
                ],
            )
            .unwrap();
            assert_eq!(schema_version(&conn).unwrap(), 1);
        }

        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.schema_version(), CURRENT_VERSION);

        let files = db.list_files_for_client(&client).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "notes.txt");
        assert!(files[0].verified);
        assert_eq!(files[0].size, 0);
        assert_eq!(files[0].crc, None);
    }

    #[test]
    fn test_failed_step_leaves_store_usable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.db");

        {
            // Claims v1 but has no files table, so v2 cannot apply.
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE clients (
                     id BLOB PRIMARY KEY NOT NULL,
                     name TEXT NOT NULL UNIQUE,
                     public_key BLOB,
                     last_seen TEXT NOT NULL,
                     session_key BLOB
                 );
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.schema_version(), 1);

        let id = ClientId::generate();
        db.save_client(&id, "survivor", None, None).unwrap();
        assert_eq!(db.get_client_by_id(&id).unwrap().unwrap().name, "survivor");
    }
}
