use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// The target worker's queue is at capacity. Callers surface this
    /// as admission-rejected (HTTP 429).
    #[error("queue full on pool '{pool}' worker {worker_id}")]
    QueueFull { pool: String, worker_id: usize },

    /// The pool is shutting down and admits no new jobs.
    #[error("pool '{pool}' is shut down")]
    ShutDown { pool: String },
}

pub type Result<T> = std::result::Result<T, PoolError>;
