use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    db::models::{Application, ApplicationStatus, Conversation, Task, TaskStatus, UserRole},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::{conversations::get_or_create_conversation, tasks::fetch_task},
    services::notify::{notify, NotificationKind},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/tasks/:id/applications",
            get(list_task_applications).post(apply_to_task),
        )
        .route("/applications/mine", get(my_applications))
        .route("/applications/:id/accept", post(accept_application))
        .route("/applications/:id/reject", post(reject_application))
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub message: String,
    pub proposed_budget: Option<f64>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ApplicationView {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub application: Application,
    pub freelancer_name: String,
    pub task_title: String,
}

#[derive(Debug, Serialize)]
pub struct ApplicationListResponse {
    pub applications: Vec<ApplicationView>,
}

#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    pub application: Application,
    pub task: Task,
    pub conversation: Conversation,
}

const APPLICATION_VIEW_SELECT: &str = r#"
    SELECT a.id, a.task_id, a.freelancer_id, a.message, a.proposed_budget, a.status, a.created_at,
           u.name AS freelancer_name, t.title AS task_title
    FROM applications a
    JOIN users u ON a.freelancer_id = u.id
    JOIN tasks t ON a.task_id = t.id
"#;

async fn fetch_application(pool: &sqlx::SqlitePool, id: &str) -> Result<Application> {
    sqlx::query_as::<_, Application>("SELECT * FROM applications WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Application not found".to_string()))
}

pub(crate) async fn apply_to_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
    Json(body): Json<ApplyRequest>,
) -> Result<Json<Application>> {
    user.require_role(UserRole::Freelancer, "apply to tasks")?;

    if body.message.trim().is_empty() {
        return Err(AppError::Validation(
            "A cover message is required".to_string(),
        ));
    }
    if body
        .proposed_budget
        .is_some_and(|b| !b.is_finite() || b <= 0.0)
    {
        return Err(AppError::Validation(
            "Proposed budget must be a positive amount".to_string(),
        ));
    }

    let task = fetch_task(&state.db.pool, &task_id).await?;
    if task.status != TaskStatus::Open {
        return Err(AppError::Validation(
            "This task is not accepting applications".to_string(),
        ));
    }
    if task.client_id == user.id {
        return Err(AppError::Forbidden(
            "You cannot apply to your own task".to_string(),
        ));
    }

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM applications WHERE task_id = ? AND freelancer_id = ?",
    )
    .bind(&task.id)
    .bind(&user.id)
    .fetch_one(&state.db.pool)
    .await?;

    if existing > 0 {
        return Err(AppError::Conflict(
            "You have already applied to this task".to_string(),
        ));
    }

    let application = Application {
        id: Uuid::new_v4().to_string(),
        task_id: task.id.clone(),
        freelancer_id: user.id.clone(),
        message: body.message.trim().to_string(),
        proposed_budget: body.proposed_budget,
        status: ApplicationStatus::Pending,
        created_at: Utc::now(),
    };

    let mut tx = state.db.pool.begin().await?;

    sqlx::query(
        "INSERT INTO applications (id, task_id, freelancer_id, message, proposed_budget, status, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&application.id)
    .bind(&application.task_id)
    .bind(&application.freelancer_id)
    .bind(&application.message)
    .bind(application.proposed_budget)
    .bind(application.status)
    .bind(application.created_at)
    .execute(&mut *tx)
    .await?;

    notify(
        &mut *tx,
        &task.client_id,
        NotificationKind::ApplicationReceived,
        &format!("{} applied to \"{}\"", user.name, task.title),
        Some(&task.id),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(application_id = %application.id, task_id = %task.id, "application submitted");

    Ok(Json(application))
}

async fn list_task_applications(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<ApplicationListResponse>> {
    let task = fetch_task(&state.db.pool, &task_id).await?;
    if task.client_id != user.id {
        return Err(AppError::Forbidden(
            "Only the task owner can see its applications".to_string(),
        ));
    }

    let applications = sqlx::query_as::<_, ApplicationView>(&format!(
        "{APPLICATION_VIEW_SELECT} WHERE a.task_id = ? ORDER BY a.created_at ASC"
    ))
    .bind(&task.id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(ApplicationListResponse { applications }))
}

async fn my_applications(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApplicationListResponse>> {
    let applications = sqlx::query_as::<_, ApplicationView>(&format!(
        "{APPLICATION_VIEW_SELECT} WHERE a.freelancer_id = ? ORDER BY a.created_at DESC"
    ))
    .bind(&user.id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(ApplicationListResponse { applications }))
}

/// Loads the application and its task and checks that `user` owns the task
/// and the application is still pending.
async fn load_pending_for_owner(
    state: &AppState,
    user: &AuthUser,
    application_id: &str,
) -> Result<(Application, Task)> {
    let application = fetch_application(&state.db.pool, application_id).await?;
    let task = fetch_task(&state.db.pool, &application.task_id).await?;

    if task.client_id != user.id {
        return Err(AppError::Forbidden(
            "Only the task owner can decide on applications".to_string(),
        ));
    }
    if application.status != ApplicationStatus::Pending {
        return Err(AppError::Validation(format!(
            "This application was already {}",
            application.status
        )));
    }

    Ok((application, task))
}

pub(crate) async fn accept_application(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<AcceptResponse>> {
    let (mut application, mut task) = load_pending_for_owner(&state, &user, &id).await?;

    if !task.status.can_transition_to(TaskStatus::InProgress) {
        return Err(AppError::Validation(format!(
            "Cannot accept applications while the task is {}",
            task.status
        )));
    }

    let now = Utc::now();
    let mut tx = state.db.pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE tasks SET status = ?, freelancer_id = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(TaskStatus::InProgress)
    .bind(&application.freelancer_id)
    .bind(now)
    .bind(&task.id)
    .bind(TaskStatus::Open)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::Conflict(
            "The task is no longer open".to_string(),
        ));
    }

    let accepted = sqlx::query("UPDATE applications SET status = ? WHERE id = ? AND status = ?")
        .bind(ApplicationStatus::Accepted)
        .bind(&application.id)
        .bind(ApplicationStatus::Pending)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if accepted == 0 {
        return Err(AppError::Conflict(
            "The application was already decided".to_string(),
        ));
    }

    // Everyone else who applied is turned down.
    let rejected = sqlx::query_scalar::<_, String>(
        "UPDATE applications SET status = ? WHERE task_id = ? AND id != ? AND status = ? RETURNING freelancer_id",
    )
    .bind(ApplicationStatus::Rejected)
    .bind(&task.id)
    .bind(&application.id)
    .bind(ApplicationStatus::Pending)
    .fetch_all(&mut *tx)
    .await?;

    let conversation =
        get_or_create_conversation(&mut *tx, &task.id, &task.client_id, &application.freelancer_id)
            .await?;

    notify(
        &mut *tx,
        &application.freelancer_id,
        NotificationKind::ApplicationAccepted,
        &format!("Your application to \"{}\" was accepted", task.title),
        Some(&task.id),
    )
    .await?;
    for freelancer_id in &rejected {
        notify(
            &mut *tx,
            freelancer_id,
            NotificationKind::ApplicationRejected,
            &format!("Your application to \"{}\" was not selected", task.title),
            Some(&task.id),
        )
        .await?;
    }

    tx.commit().await?;

    application.status = ApplicationStatus::Accepted;
    task.status = TaskStatus::InProgress;
    task.freelancer_id = Some(application.freelancer_id.clone());
    task.updated_at = now;

    tracing::info!(
        application_id = %application.id,
        task_id = %task.id,
        rejected = rejected.len(),
        "application accepted"
    );

    Ok(Json(AcceptResponse {
        application,
        task,
        conversation,
    }))
}

pub(crate) async fn reject_application(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Application>> {
    let (mut application, task) = load_pending_for_owner(&state, &user, &id).await?;

    let mut tx = state.db.pool.begin().await?;

    let rejected = sqlx::query("UPDATE applications SET status = ? WHERE id = ? AND status = ?")
        .bind(ApplicationStatus::Rejected)
        .bind(&application.id)
        .bind(ApplicationStatus::Pending)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if rejected == 0 {
        return Err(AppError::Conflict(
            "The application was already decided".to_string(),
        ));
    }

    notify(
        &mut *tx,
        &application.freelancer_id,
        NotificationKind::ApplicationRejected,
        &format!("Your application to \"{}\" was not selected", task.title),
        Some(&task.id),
    )
    .await?;

    tx.commit().await?;

    application.status = ApplicationStatus::Rejected;
    Ok(Json(application))
}
