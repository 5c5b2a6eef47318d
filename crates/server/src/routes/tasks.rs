use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, SqlitePool};
use uuid::Uuid;

use crate::{
    catalog::{filter_tasks, TaskFilters, TaskListQuery},
    db::models::{ExperienceLevel, ProjectType, Task, TaskStatus, UserRole, TASK_COLUMNS},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::notify::{notify, NotificationKind},
    AppState,
};

/// Public catalog routes.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/", get(list_tasks))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_task))
        .route("/mine", get(my_tasks))
        .route("/:id", get(get_task).put(update_task))
        .route("/:id/publish", post(publish_task))
        .route("/:id/complete", post(complete_task))
        .route("/:id/cancel", post(cancel_task))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub budget: f64,
    pub category: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub experience_level: ExperienceLevel,
    pub project_type: ProjectType,
    pub deadline: Option<DateTime<Utc>>,
    /// Publish immediately instead of saving a draft.
    #[serde(default = "default_publish")]
    pub publish: bool,
}

fn default_publish() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub budget: Option<f64>,
    pub category: Option<String>,
    pub required_skills: Option<Vec<String>>,
    pub experience_level: Option<ExperienceLevel>,
    pub project_type: Option<ProjectType>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub total: usize,
}

pub(crate) async fn fetch_task(pool: &SqlitePool, id: &str) -> Result<Task> {
    sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".to_string()))
}

fn require_owner(task: &Task, user: &AuthUser) -> Result<()> {
    if task.client_id != user.id {
        return Err(AppError::Forbidden(
            "Only the task owner can do this".to_string(),
        ));
    }
    Ok(())
}

fn validate_budget(budget: f64) -> Result<()> {
    if !budget.is_finite() || budget <= 0.0 {
        return Err(AppError::Validation(
            "Budget must be a positive amount".to_string(),
        ));
    }
    Ok(())
}

fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// Trims skill names and drops case-insensitive duplicates, keeping the first spelling.
fn normalize_skills(skills: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    skills
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>> {
    let filters = TaskFilters::try_from(query)?;

    let tasks = sqlx::query_as::<_, Task>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? ORDER BY created_at DESC"
    ))
    .bind(TaskStatus::Open)
    .fetch_all(&state.db.pool)
    .await?;

    let tasks: Vec<Task> = filter_tasks(&tasks, &filters, Utc::now())
        .into_iter()
        .cloned()
        .collect();

    Ok(Json(TaskListResponse {
        total: tasks.len(),
        tasks,
    }))
}

async fn my_tasks(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<TaskListResponse>> {
    let tasks = sqlx::query_as::<_, Task>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE client_id = ? OR freelancer_id = ? ORDER BY created_at DESC"
    ))
    .bind(&user.id)
    .bind(&user.id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(TaskListResponse {
        total: tasks.len(),
        tasks,
    }))
}

pub(crate) async fn create_task(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Json<Task>> {
    user.require_role(UserRole::Client, "post tasks")?;
    require_text(&body.title, "Title")?;
    require_text(&body.description, "Description")?;
    require_text(&body.category, "Category")?;
    validate_budget(body.budget)?;

    let now = Utc::now();
    if body.deadline.is_some_and(|d| d <= now) {
        return Err(AppError::Validation(
            "Deadline must be in the future".to_string(),
        ));
    }

    let task = Task {
        id: Uuid::new_v4().to_string(),
        title: body.title.trim().to_string(),
        description: body.description.trim().to_string(),
        budget: body.budget,
        status: if body.publish {
            TaskStatus::Open
        } else {
            TaskStatus::Draft
        },
        client_id: user.id.clone(),
        freelancer_id: None,
        category: body.category.trim().to_string(),
        required_skills: normalize_skills(body.required_skills),
        experience_level: body.experience_level,
        project_type: body.project_type,
        deadline: body.deadline,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO tasks (id, title, description, budget, status, client_id, freelancer_id, category,
                           required_skills, experience_level, project_type, deadline, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&task.id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.budget)
    .bind(task.status)
    .bind(&task.client_id)
    .bind(&task.category)
    .bind(SqlJson(&task.required_skills))
    .bind(task.experience_level)
    .bind(task.project_type)
    .bind(task.deadline)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&state.db.pool)
    .await?;

    tracing::info!(task_id = %task.id, status = %task.status, "created task");

    Ok(Json(task))
}

async fn get_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Task>> {
    let task = fetch_task(&state.db.pool, &id).await?;

    // Drafts are private to their owner
    if task.status == TaskStatus::Draft && task.client_id != user.id {
        return Err(AppError::NotFound("Task not found".to_string()));
    }

    Ok(Json(task))
}

pub(crate) async fn update_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<Task>> {
    let mut task = fetch_task(&state.db.pool, &id).await?;
    require_owner(&task, &user)?;

    if !task.status.is_editable() {
        return Err(AppError::Validation(format!(
            "A task that is {} can no longer be edited",
            task.status
        )));
    }

    if let Some(title) = body.title {
        require_text(&title, "Title")?;
        task.title = title.trim().to_string();
    }
    if let Some(description) = body.description {
        require_text(&description, "Description")?;
        task.description = description.trim().to_string();
    }
    if let Some(budget) = body.budget {
        validate_budget(budget)?;
        task.budget = budget;
    }
    if let Some(category) = body.category {
        require_text(&category, "Category")?;
        task.category = category.trim().to_string();
    }
    if let Some(skills) = body.required_skills {
        task.required_skills = normalize_skills(skills);
    }
    if let Some(level) = body.experience_level {
        task.experience_level = level;
    }
    if let Some(project_type) = body.project_type {
        task.project_type = project_type;
    }
    if let Some(deadline) = body.deadline {
        if deadline <= Utc::now() {
            return Err(AppError::Validation(
                "Deadline must be in the future".to_string(),
            ));
        }
        task.deadline = Some(deadline);
    }
    task.updated_at = Utc::now();

    sqlx::query(
        r#"
        UPDATE tasks SET title = ?, description = ?, budget = ?, category = ?, required_skills = ?,
                         experience_level = ?, project_type = ?, deadline = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.budget)
    .bind(&task.category)
    .bind(SqlJson(&task.required_skills))
    .bind(task.experience_level)
    .bind(task.project_type)
    .bind(task.deadline)
    .bind(task.updated_at)
    .bind(&task.id)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(task))
}

/// Moves an owned task to `next`, guarded by the status lifecycle.
async fn transition(state: &AppState, user: &AuthUser, id: &str, next: TaskStatus) -> Result<Task> {
    let mut task = fetch_task(&state.db.pool, id).await?;
    require_owner(&task, user)?;

    if !task.status.can_transition_to(next) {
        return Err(AppError::Validation(format!(
            "Cannot move a task from {} to {}",
            task.status, next
        )));
    }
    if next == TaskStatus::InProgress {
        return Err(AppError::Validation(
            "A task starts when an application is accepted".to_string(),
        ));
    }

    let previous = task.status;
    task.status = next;
    task.updated_at = Utc::now();

    let mut tx = state.db.pool.begin().await?;

    // The status check in the WHERE clause guards against concurrent writers.
    let updated = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(task.status)
        .bind(task.updated_at)
        .bind(&task.id)
        .bind(previous)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if updated == 0 {
        return Err(AppError::Conflict(
            "The task was changed by someone else, reload and try again".to_string(),
        ));
    }

    if next == TaskStatus::Cancelled {
        sqlx::query("UPDATE applications SET status = 'rejected' WHERE task_id = ? AND status = 'pending'")
            .bind(&task.id)
            .execute(&mut *tx)
            .await?;
    }

    let notice = match next {
        TaskStatus::Completed => Some((NotificationKind::TaskCompleted, "completed")),
        TaskStatus::Cancelled => Some((NotificationKind::TaskCancelled, "cancelled")),
        _ => None,
    };
    if let (Some(freelancer_id), Some((kind, verb))) = (&task.freelancer_id, notice) {
        notify(
            &mut *tx,
            freelancer_id,
            kind,
            &format!("Task \"{}\" was {verb}", task.title),
            Some(&task.id),
        )
        .await?;
    }

    tx.commit().await?;

    tracing::info!(task_id = %task.id, from = %previous, to = %next, "task status changed");

    Ok(task)
}

pub(crate) async fn publish_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Task>> {
    Ok(Json(transition(&state, &user, &id, TaskStatus::Open).await?))
}

pub(crate) async fn complete_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Task>> {
    Ok(Json(transition(&state, &user, &id, TaskStatus::Completed).await?))
}

pub(crate) async fn cancel_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Task>> {
    Ok(Json(transition(&state, &user, &id, TaskStatus::Cancelled).await?))
}
