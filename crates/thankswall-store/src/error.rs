use thiserror::Error;

/// Errors that can occur during event persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored timestamp could not be parsed back.
    #[error("corrupt upload_time in row {id}: {value}")]
    BadTimestamp { id: i64, value: String },

    /// Another thread panicked while holding the connection.
    #[error("database connection lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;
