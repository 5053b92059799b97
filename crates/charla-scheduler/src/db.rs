use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::types::{PostStatus, ScheduledPost};

/// Persistent tier of the scheduler.
///
/// RFC3339 timestamps compare lexicographically, so the due query is a
/// string comparison over the indexed column.
pub struct PostStore {
    db: Mutex<Connection>,
}

impl PostStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scheduled_posts (
                id           TEXT NOT NULL PRIMARY KEY,
                channel_id   TEXT NOT NULL,
                target_id    TEXT NOT NULL,
                text         TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'pending',
                error        TEXT,
                updated_at   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_due
                ON scheduled_posts (status, scheduled_at);",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn add(
        &self,
        channel_id: &str,
        target_id: &str,
        text: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<ScheduledPost> {
        if target_id.trim().is_empty() {
            return Err(SchedulerError::Validation("target_id must not be empty".into()));
        }
        let post = ScheduledPost {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            target_id: target_id.to_string(),
            text: text.to_string(),
            scheduled_at,
            status: PostStatus::Pending,
            error: None,
            updated_at: Utc::now().to_rfc3339(),
        };
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO scheduled_posts
             (id, channel_id, target_id, text, scheduled_at, status, error, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,NULL,?7)",
            rusqlite::params![
                post.id,
                post.channel_id,
                post.target_id,
                post.text,
                post.scheduled_at.to_rfc3339(),
                post.status.to_string(),
                post.updated_at,
            ],
        )?;
        info!(post_id = %post.id, at = %post.scheduled_at, "post scheduled");
        Ok(post)
    }

    /// Pending posts due within `window` from now, soonest first.
    pub fn due_within(&self, window: Duration) -> Result<Vec<ScheduledPost>> {
        let horizon = (Utc::now()
            + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero()))
        .to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, channel_id, target_id, text, scheduled_at, status, error, updated_at
             FROM scheduled_posts
             WHERE status = 'pending' AND scheduled_at <= ?1
             ORDER BY scheduled_at",
        )?;
        let rows = stmt.query_map([&horizon], row_to_post)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn mark_enqueued(&self, id: &str) -> Result<()> {
        self.set_status(id, PostStatus::Enqueued, None)
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.set_status(id, PostStatus::Failed, Some(error))
    }

    pub fn cancel(&self, id: &str) -> Result<()> {
        self.set_status(id, PostStatus::Cancelled, None)
    }

    /// Successful delivery removes the row entirely.
    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM scheduled_posts WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::PostNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<ScheduledPost> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, channel_id, target_id, text, scheduled_at, status, error, updated_at
             FROM scheduled_posts WHERE id = ?1",
            [id],
            row_to_post,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => SchedulerError::PostNotFound { id: id.to_string() },
            other => other.into(),
        })
    }

    fn set_status(&self, id: &str, status: PostStatus, error: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE scheduled_posts SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![status.to_string(), error, now, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::PostNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledPost> {
    let scheduled_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    Ok(ScheduledPost {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        target_id: row.get(2)?,
        text: row.get(3)?,
        scheduled_at: DateTime::parse_from_rfc3339(&scheduled_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        status: status_str.parse().unwrap_or(PostStatus::Pending),
        error: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PostStore {
        PostStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn add_and_due_window() {
        let store = store();
        let soon = Utc::now() + chrono::Duration::minutes(5);
        let far = Utc::now() + chrono::Duration::days(2);
        let due = store.add("wa", "group-1", "¡Oferta!", soon).unwrap();
        store.add("wa", "group-1", "más tarde", far).unwrap();

        let posts = store.due_within(Duration::from_secs(24 * 3600)).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, due.id);
    }

    #[test]
    fn enqueued_posts_leave_the_pending_scan() {
        let store = store();
        let post = store.add("wa", "g", "texto", Utc::now()).unwrap();
        store.mark_enqueued(&post.id).unwrap();
        assert!(store.due_within(Duration::from_secs(60)).unwrap().is_empty());
        assert_eq!(store.get(&post.id).unwrap().status, PostStatus::Enqueued);
    }

    #[test]
    fn failure_keeps_row_with_error() {
        let store = store();
        let post = store.add("wa", "g", "texto", Utc::now()).unwrap();
        store.mark_failed(&post.id, "socket closed").unwrap();
        let failed = store.get(&post.id).unwrap();
        assert_eq!(failed.status, PostStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("socket closed"));
    }

    #[test]
    fn delete_after_send() {
        let store = store();
        let post = store.add("wa", "g", "texto", Utc::now()).unwrap();
        store.delete(&post.id).unwrap();
        assert!(matches!(
            store.get(&post.id),
            Err(SchedulerError::PostNotFound { .. })
        ));
    }
}
