use rusqlite::Transaction;

use super::has_column;

// Columns are only added when missing so a half-migrated file can be rerun.
const COLUMNS: [(&str, &str); 3] = [
    ("size", "ALTER TABLE files ADD COLUMN size INTEGER NOT NULL DEFAULT 0"),
    ("mod_date", "ALTER TABLE files ADD COLUMN mod_date TEXT"),
    ("crc", "ALTER TABLE files ADD COLUMN crc INTEGER"),
];

pub fn up(tx: &Transaction<'_>) -> Result<(), rusqlite::Error> {
    for (column, sql) in COLUMNS {
        if !has_column(tx, "files", column)? {
            tx.execute_batch(sql)?;
        }
    }
    Ok(())
}
