use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, FixedOffset};
use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::db;
use crate::error::{Result, StoreError};
use crate::types::{NewEvent, StoredEvent};

/// Thread-safe store for submitted events.
///
/// Wraps a single SQLite connection in a `Mutex`. Calls block; async callers
/// should go through `spawn_blocking`.
pub struct EventStore {
    db: Mutex<Connection>,
}

impl EventStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Open the database file, switch to WAL and apply the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        db::init_db(&conn)?;
        Ok(Self::new(conn))
    }

    /// In-memory store with the schema applied. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::init_db(&conn)?;
        Ok(Self::new(conn))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Persist one event. `upload_time` is assigned here, once, at UTC+8.
    #[instrument(skip(self, event), fields(has_image = event.image.is_some()))]
    pub fn insert(&self, event: NewEvent) -> Result<StoredEvent> {
        let upload_time = thankswall_core::types::now_utc8();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO messages
             (message, image, user_name, group_name, event, upload_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                event.message,
                event.image,
                event.user_name,
                event.group_name,
                event.event,
                upload_time.to_rfc3339(),
            ],
        )?;
        let id = db.last_insert_rowid();
        debug!(id, "event stored");

        Ok(StoredEvent {
            id,
            message: event.message,
            user_name: event.user_name,
            group_name: event.group_name,
            event: event.event,
            upload_time,
            image: event.image,
        })
    }

    /// Most recent events, newest first.
    #[instrument(skip(self))]
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, message, image, user_name, group_name, event, upload_time
             FROM messages
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, message, image, user_name, group_name, event, raw_time) = row?;
            events.push(StoredEvent {
                id,
                message,
                user_name,
                group_name,
                event,
                upload_time: parse_time(id, &raw_time)?,
                image,
            });
        }
        Ok(events)
    }

    /// Total number of stored events.
    pub fn count(&self) -> Result<u64> {
        let db = self.conn()?;
        let n: i64 = db.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

fn parse_time(id: i64, raw: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).map_err(|_| StoreError::BadTimestamp {
        id,
        value: raw.to_string(),
    })
}
