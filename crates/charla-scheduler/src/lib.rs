pub mod db;
pub mod engine;
pub mod error;
pub mod types;

pub use db::PostStore;
pub use engine::{PostSender, SchedulerEngine};
pub use error::SchedulerError;
pub use types::{PostStatus, ScheduledPost};
