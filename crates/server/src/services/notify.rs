use chrono::Utc;
use sqlx::SqliteConnection;
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    ApplicationReceived,
    ApplicationAccepted,
    ApplicationRejected,
    TaskCompleted,
    TaskCancelled,
    NewMessage,
    RatingReceived,
}

/// Records a notification for `user_id`. Runs on the caller's connection so
/// it can join an open transaction.
pub async fn notify(
    conn: &mut SqliteConnection,
    user_id: &str,
    kind: NotificationKind,
    body: &str,
    task_id: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO notifications (id, user_id, kind, body, task_id, is_read, created_at) VALUES (?, ?, ?, ?, ?, FALSE, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(kind.as_ref())
    .bind(body)
    .bind(task_id)
    .bind(Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}
