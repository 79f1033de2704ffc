use rusqlite::Connection;

use super::StorageError;

pub const QUOTA_COUNTERS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS quota_counters (
    counter_key TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    date_key TEXT NOT NULL,
    count INTEGER NOT NULL CHECK (count >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const UPLOAD_RESERVATIONS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS upload_reservations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    date_key TEXT NOT NULL,
    status TEXT NOT NULL,
    full_path TEXT,
    size INTEGER,
    created_at TEXT NOT NULL,
    uploaded_at TEXT,
    expired_at TEXT
);
"#;

pub const UPLOAD_RESERVATIONS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_reservations_status_created ON upload_reservations(status, created_at);
CREATE INDEX IF NOT EXISTS idx_reservations_user_date ON upload_reservations(user_id, date_key);
"#;

pub fn init_database(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(QUOTA_COUNTERS_TABLE_SCHEMA)?;
    conn.execute_batch(UPLOAD_RESERVATIONS_TABLE_SCHEMA)?;
    conn.execute_batch(UPLOAD_RESERVATIONS_INDEXES)?;
    Ok(())
}
