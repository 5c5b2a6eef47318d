use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    db::models::User,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id/block", post(block_user))
        .route("/users/:id/unblock", post(unblock_user))
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
}

pub(crate) async fn list_users(
    State(state): State<AppState>,
    admin: AuthUser,
) -> Result<Json<UserListResponse>> {
    admin.require_admin()?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&state.db.pool)
        .await?;

    Ok(Json(UserListResponse { users }))
}

pub(crate) async fn block_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<BlockRequest>,
) -> Result<Json<User>> {
    admin.require_admin()?;

    if admin.id == id {
        return Err(AppError::BadRequest("You cannot block yourself".to_string()));
    }
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation("A block reason is required".to_string()));
    }

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET is_blocked = TRUE, block_reason = ?, blocked_at = ? WHERE id = ? RETURNING *",
    )
    .bind(reason)
    .bind(Utc::now())
    .bind(&id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    tracing::info!(admin_id = %admin.id, user_id = %user.id, reason, "user blocked");

    Ok(Json(user))
}

pub(crate) async fn unblock_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<User>> {
    admin.require_admin()?;

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET is_blocked = FALSE, block_reason = NULL, blocked_at = NULL WHERE id = ? RETURNING *",
    )
    .bind(&id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    tracing::info!(admin_id = %admin.id, user_id = %user.id, "user unblocked");

    Ok(Json(user))
}
