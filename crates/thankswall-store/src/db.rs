use rusqlite::{Connection, Result};

/// Initialise event tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_messages_table(conn)
}

/// Whether the schema has already been applied.
pub fn schema_exists(conn: &Connection) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'messages')",
        [],
        |row| row.get(0),
    )
}

/// One row per submitted event. `image` is NULL for text-only events.
/// Name columns keep whatever the submitter typed, empty included.
fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message     TEXT NOT NULL,
            image       BLOB,
            user_name   TEXT NOT NULL DEFAULT '',
            group_name  TEXT NOT NULL DEFAULT '',
            event       TEXT NOT NULL DEFAULT '',
            upload_time TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_upload_time
            ON messages(upload_time DESC);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!schema_exists(&conn).unwrap());
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        assert!(schema_exists(&conn).unwrap());
    }
}
