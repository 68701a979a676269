//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `clients` and `files`.

use rusqlite::Transaction;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Clients
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS clients (
    id          BLOB PRIMARY KEY NOT NULL,   -- 16-byte client id
    name        TEXT NOT NULL UNIQUE,
    public_key  BLOB,                        -- DER RSA public key
    last_seen   TEXT NOT NULL,               -- RFC-3339
    session_key BLOB                         -- current AES key
);

-- ----------------------------------------------------------------
-- Files
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    id        TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    client_id BLOB NOT NULL,                 -- FK -> clients(id)
    filename  TEXT NOT NULL,
    path      TEXT NOT NULL,
    verified  INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1

    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(tx: &Transaction<'_>) -> Result<(), rusqlite::Error> {
    tx.execute_batch(UP_SQL)
}
