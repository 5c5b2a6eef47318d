use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::models::{Rating, TaskStatus},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::tasks::fetch_task,
    services::notify::{notify, NotificationKind},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/tasks/:id/ratings", post(rate_task))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/users/:id/ratings", get(user_ratings))
}

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub score: i64,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RatingSummary {
    pub ratings: Vec<Rating>,
    pub average: Option<f64>,
    pub count: usize,
}

pub(crate) async fn rate_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
    Json(body): Json<RateRequest>,
) -> Result<Json<Rating>> {
    let task = fetch_task(&state.db.pool, &task_id).await?;

    if task.status != TaskStatus::Completed {
        return Err(AppError::Conflict(
            "Only completed tasks can be rated".to_string(),
        ));
    }

    let ratee_id = match task.freelancer_id.as_deref() {
        Some(freelancer_id) if user.id == task.client_id => freelancer_id.to_string(),
        Some(freelancer_id) if user.id == freelancer_id => task.client_id.clone(),
        _ => {
            return Err(AppError::Forbidden(
                "Only the client and the freelancer of a task can rate it".to_string(),
            ))
        }
    };

    if !(1..=5).contains(&body.score) {
        return Err(AppError::Validation(
            "Score must be between 1 and 5".to_string(),
        ));
    }

    let rating = Rating {
        id: Uuid::new_v4().to_string(),
        task_id: task.id.clone(),
        rater_id: user.id.clone(),
        ratee_id,
        score: body.score,
        comment: body.comment.filter(|c| !c.trim().is_empty()),
        created_at: Utc::now(),
    };

    let mut tx = state.db.pool.begin().await?;

    sqlx::query(
        "INSERT INTO ratings (id, task_id, rater_id, ratee_id, score, comment, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&rating.id)
    .bind(&rating.task_id)
    .bind(&rating.rater_id)
    .bind(&rating.ratee_id)
    .bind(rating.score)
    .bind(&rating.comment)
    .bind(rating.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict("You have already rated this task".to_string())
        }
        e => AppError::Database(e),
    })?;

    notify(
        &mut *tx,
        &rating.ratee_id,
        NotificationKind::RatingReceived,
        &format!("{} rated you {}/5 for \"{}\"", user.name, rating.score, task.title),
        Some(&task.id),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(task_id = %task.id, rater_id = %rating.rater_id, score = rating.score, "task rated");

    Ok(Json(rating))
}

pub(crate) async fn user_ratings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<RatingSummary>> {
    let ratings = sqlx::query_as::<_, Rating>(
        "SELECT * FROM ratings WHERE ratee_id = ? ORDER BY created_at DESC",
    )
    .bind(&user_id)
    .fetch_all(&state.db.pool)
    .await?;

    let average = (!ratings.is_empty())
        .then(|| ratings.iter().map(|r| r.score as f64).sum::<f64>() / ratings.len() as f64);

    Ok(Json(RatingSummary {
        count: ratings.len(),
        average,
        ratings,
    }))
}
