use rusqlite::Transaction;

const UP_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_files_client ON files(client_id, filename);
"#;

pub fn up(tx: &Transaction<'_>) -> Result<(), rusqlite::Error> {
    tx.execute_batch(UP_SQL)
}
