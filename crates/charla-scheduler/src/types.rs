use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a scheduled post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    /// Waiting in the persistent store for promotion.
    Pending,
    /// Promoted into the in-memory time-sorted queue.
    Enqueued,
    /// Delivered. Sent posts are deleted, so this status only appears
    /// transiently.
    Sent,
    /// Delivery failed; `error` holds the reason.
    Failed,
    /// Cancelled by an operator before delivery.
    Cancelled,
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PostStatus::Pending => "pending",
            PostStatus::Enqueued => "enqueued",
            PostStatus::Sent => "sent",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PostStatus::Pending),
            "enqueued" => Ok(PostStatus::Enqueued),
            "sent" => Ok(PostStatus::Sent),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" => Ok(PostStatus::Cancelled),
            other => Err(format!("unknown post status: {other}")),
        }
    }
}

/// A message scheduled for future delivery on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    /// UUID v4 string — primary key.
    pub id: String,
    pub channel_id: String,
    /// Chat or group the post goes to.
    pub target_id: String,
    pub text: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: PostStatus,
    pub error: Option<String>,
    pub updated_at: String,
}

impl ScheduledPost {
    /// Queue score: unix epoch seconds of the delivery instant.
    pub fn epoch(&self) -> i64 {
        self.scheduled_at.timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            PostStatus::Pending,
            PostStatus::Enqueued,
            PostStatus::Sent,
            PostStatus::Failed,
            PostStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<PostStatus>().unwrap(), status);
        }
        assert!("later".parse::<PostStatus>().is_err());
    }
}
