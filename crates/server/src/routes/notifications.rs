use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::{
    db::models::Notification,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/:id/read", post(mark_read))
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
    pub unread: usize,
}

pub(crate) async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<NotificationListResponse>> {
    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(&user.id)
    .fetch_all(&state.db.pool)
    .await?;

    let unread = notifications.iter().filter(|n| !n.is_read).count();
    Ok(Json(NotificationListResponse {
        notifications,
        unread,
    }))
}

pub(crate) async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Notification>> {
    sqlx::query_as::<_, Notification>(
        "UPDATE notifications SET is_read = TRUE WHERE id = ? AND user_id = ? RETURNING *",
    )
    .bind(&id)
    .bind(&user.id)
    .fetch_optional(&state.db.pool)
    .await?
    .map(Json)
    .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))
}
