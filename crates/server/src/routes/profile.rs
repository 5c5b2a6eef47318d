use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{Category, PortfolioItem, Proficiency, Skill, User, UserRole, UserSkill},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::auth::{fetch_user, validate_hourly_rate},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", put(update_profile))
        .route("/skills", get(my_skills))
        .route("/skills/:skill_id", put(set_skill).delete(remove_skill))
        .route("/portfolio", post(add_portfolio_item))
        .route("/portfolio/:id", delete(remove_portfolio_item))
}

/// Public reference data used by forms and filters.
pub fn reference_router() -> Router<AppState> {
    Router::new()
        .route("/skills", get(list_skills))
        .route("/categories", get(list_categories))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub bio: Option<String>,
    /// Absent keeps the current rate, `null` clears it.
    #[serde(default, deserialize_with = "present")]
    pub hourly_rate: Option<Option<f64>>,
}

/// Marks a present field as `Some`, so an explicit `null` becomes `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct SetSkillRequest {
    pub proficiency: Proficiency,
}

#[derive(Debug, Deserialize)]
pub struct PortfolioRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub project_url: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SkillListResponse {
    pub skills: Vec<UserSkill>,
}

async fn user_skills(pool: &SqlitePool, user_id: &str) -> Result<Vec<UserSkill>> {
    let skills = sqlx::query_as::<_, UserSkill>(
        r#"
        SELECT s.id AS skill_id, s.name, s.category, us.proficiency
        FROM user_skills us
        JOIN skills s ON us.skill_id = s.id
        WHERE us.user_id = ?
        ORDER BY s.name ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(skills)
}

pub(crate) async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<User>> {
    let current = fetch_user(&state.db.pool, &user.id).await?;

    let name = match body.name {
        Some(name) if name.trim().is_empty() => {
            return Err(AppError::Validation("Name cannot be empty".to_string()))
        }
        Some(name) => name.trim().to_string(),
        None => current.name,
    };
    validate_hourly_rate(body.hourly_rate.flatten())?;

    // Blank bio clears it.
    let bio = match body.bio {
        Some(bio) if bio.trim().is_empty() => None,
        Some(bio) => Some(bio),
        None => current.bio,
    };
    // Only freelancers carry a rate.
    let hourly_rate = match body.hourly_rate {
        _ if current.role != UserRole::Freelancer => None,
        Some(rate) => rate,
        None => current.hourly_rate,
    };

    let updated = sqlx::query_as::<_, User>(
        "UPDATE users SET name = ?, bio = ?, hourly_rate = ? WHERE id = ? RETURNING *",
    )
    .bind(&name)
    .bind(&bio)
    .bind(hourly_rate)
    .bind(&user.id)
    .fetch_one(&state.db.pool)
    .await?;

    Ok(Json(updated))
}

async fn my_skills(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<SkillListResponse>> {
    let skills = user_skills(&state.db.pool, &user.id).await?;
    Ok(Json(SkillListResponse { skills }))
}

pub(crate) async fn set_skill(
    State(state): State<AppState>,
    user: AuthUser,
    Path(skill_id): Path<String>,
    Json(body): Json<SetSkillRequest>,
) -> Result<Json<SkillListResponse>> {
    user.require_role(UserRole::Freelancer, "list skills")?;

    let known = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM skills WHERE id = ?")
        .bind(&skill_id)
        .fetch_one(&state.db.pool)
        .await?;
    if known == 0 {
        return Err(AppError::NotFound("Skill not found".to_string()));
    }

    sqlx::query(
        r#"
        INSERT INTO user_skills (user_id, skill_id, proficiency) VALUES (?, ?, ?)
        ON CONFLICT (user_id, skill_id) DO UPDATE SET proficiency = excluded.proficiency
        "#,
    )
    .bind(&user.id)
    .bind(&skill_id)
    .bind(body.proficiency)
    .execute(&state.db.pool)
    .await?;

    let skills = user_skills(&state.db.pool, &user.id).await?;
    Ok(Json(SkillListResponse { skills }))
}

pub(crate) async fn remove_skill(
    State(state): State<AppState>,
    user: AuthUser,
    Path(skill_id): Path<String>,
) -> Result<Json<SkillListResponse>> {
    let removed = sqlx::query("DELETE FROM user_skills WHERE user_id = ? AND skill_id = ?")
        .bind(&user.id)
        .bind(&skill_id)
        .execute(&state.db.pool)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(AppError::NotFound("Skill not on your profile".to_string()));
    }

    let skills = user_skills(&state.db.pool, &user.id).await?;
    Ok(Json(SkillListResponse { skills }))
}

pub(crate) async fn add_portfolio_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PortfolioRequest>,
) -> Result<Json<PortfolioItem>> {
    user.require_role(UserRole::Freelancer, "keep a portfolio")?;

    if body.title.trim().is_empty() {
        return Err(AppError::Validation("Portfolio title is required".to_string()));
    }
    if let Some(image_url) = &body.image_url {
        if !state.storage.owns_url(image_url) {
            return Err(AppError::Validation(
                "Portfolio images must be uploaded first".to_string(),
            ));
        }
    }

    let item = PortfolioItem {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        title: body.title.trim().to_string(),
        description: body.description,
        project_url: body.project_url.filter(|u| !u.trim().is_empty()),
        image_url: body.image_url,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO portfolio (id, user_id, title, description, project_url, image_url, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&item.id)
    .bind(&item.user_id)
    .bind(&item.title)
    .bind(&item.description)
    .bind(&item.project_url)
    .bind(&item.image_url)
    .bind(item.created_at)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(item))
}

pub(crate) async fn remove_portfolio_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let removed = sqlx::query("DELETE FROM portfolio WHERE id = ? AND user_id = ?")
        .bind(&id)
        .bind(&user.id)
        .execute(&state.db.pool)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(AppError::NotFound("Portfolio item not found".to_string()));
    }

    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn list_skills(State(state): State<AppState>) -> Result<Json<Vec<Skill>>> {
    let skills = sqlx::query_as::<_, Skill>("SELECT * FROM skills ORDER BY category, name")
        .fetch_all(&state.db.pool)
        .await?;
    Ok(Json(skills))
}

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>> {
    let categories = sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name")
        .fetch_all(&state.db.pool)
        .await?;
    Ok(Json(categories))
}
