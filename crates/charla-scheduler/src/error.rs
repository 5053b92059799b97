use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("post not found: {id}")]
    PostNotFound { id: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Store(#[from] charla_store::StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
