pub mod error;
pub mod monitor;
pub mod pool;

pub use error::PoolError;
pub use monitor::PoolMonitor;
pub use pool::{Job, PoolStats, WorkerPool, WorkerStats};
