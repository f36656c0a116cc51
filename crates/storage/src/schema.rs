use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS records (
    entity TEXT NOT NULL,
    key BLOB NOT NULL,
    fields BLOB NOT NULL,
    written_in_batch BLOB NOT NULL CHECK (length(written_in_batch) = 16),
    PRIMARY KEY (entity, key)
);

CREATE TABLE IF NOT EXISTS record_refs (
    entity TEXT NOT NULL,
    key BLOB NOT NULL,
    ref_name TEXT NOT NULL,
    target_entity TEXT NOT NULL,
    target_key BLOB NOT NULL,
    PRIMARY KEY (entity, key, ref_name)
);
CREATE INDEX IF NOT EXISTS idx_record_refs_target ON record_refs (target_entity, target_key);

CREATE TABLE IF NOT EXISTS batches (
    batch_id BLOB PRIMARY KEY CHECK (length(batch_id) = 16),
    checksum BLOB NOT NULL CHECK (length(checksum) = 32),
    atomic INTEGER NOT NULL,
    op_count INTEGER NOT NULL,
    applied_count INTEGER NOT NULL,
    applied_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
";
