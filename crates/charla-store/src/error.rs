use thiserror::Error;

/// Errors from a session store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The backend rejected the value (e.g. oversized entry).
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
