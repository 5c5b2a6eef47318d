use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::{
    catalog::{filter_freelancers, FreelancerFilters, FreelancerListQuery},
    db::models::{FreelancerCard, PortfolioItem, Rating, User, UserRole, UserSkill},
    error::{AppError, Result},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_freelancers))
        .route("/:id", get(get_freelancer))
}

#[derive(Debug, Serialize)]
pub struct FreelancerListResponse {
    pub freelancers: Vec<FreelancerCard>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct FreelancerProfile {
    #[serde(flatten)]
    pub card: FreelancerCard,
    pub portfolio: Vec<PortfolioItem>,
    pub ratings: Vec<Rating>,
}

#[derive(FromRow)]
struct OwnedSkill {
    user_id: String,
    #[sqlx(flatten)]
    skill: UserSkill,
}

/// Builds catalog cards for every visible freelancer, or just one when `only` is set.
async fn load_cards(pool: &SqlitePool, only: Option<&str>) -> Result<Vec<FreelancerCard>> {
    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE role = ? AND is_blocked = FALSE AND (? IS NULL OR id = ?)
        ORDER BY created_at DESC
        "#,
    )
    .bind(UserRole::Freelancer)
    .bind(only)
    .bind(only)
    .fetch_all(pool)
    .await?;

    let owned = sqlx::query_as::<_, OwnedSkill>(
        r#"
        SELECT us.user_id, s.id AS skill_id, s.name, s.category, us.proficiency
        FROM user_skills us
        JOIN skills s ON us.skill_id = s.id
        WHERE (? IS NULL OR us.user_id = ?)
        ORDER BY s.name ASC
        "#,
    )
    .bind(only)
    .bind(only)
    .fetch_all(pool)
    .await?;

    let mut skills: HashMap<String, Vec<UserSkill>> = HashMap::new();
    for row in owned {
        skills.entry(row.user_id).or_default().push(row.skill);
    }

    let aggregates = sqlx::query_as::<_, (String, f64, i64)>(
        "SELECT ratee_id, AVG(score), COUNT(*) FROM ratings GROUP BY ratee_id",
    )
    .fetch_all(pool)
    .await?;
    let ratings: HashMap<String, (f64, i64)> = aggregates
        .into_iter()
        .map(|(id, avg, count)| (id, (avg, count)))
        .collect();

    Ok(users
        .into_iter()
        .map(|user| {
            let (rating, rating_count) = match ratings.get(&user.id) {
                Some(&(avg, count)) => (Some(avg), count),
                None => (None, 0),
            };
            FreelancerCard {
                skills: skills.remove(&user.id).unwrap_or_default(),
                rating,
                rating_count,
                id: user.id,
                name: user.name,
                bio: user.bio,
                hourly_rate: user.hourly_rate,
                created_at: user.created_at,
            }
        })
        .collect())
}

pub(crate) async fn list_freelancers(
    State(state): State<AppState>,
    Query(query): Query<FreelancerListQuery>,
) -> Result<Json<FreelancerListResponse>> {
    let filters = FreelancerFilters::try_from(query)?;
    let cards = load_cards(&state.db.pool, None).await?;

    let freelancers: Vec<FreelancerCard> = filter_freelancers(&cards, &filters)
        .into_iter()
        .cloned()
        .collect();

    Ok(Json(FreelancerListResponse {
        total: freelancers.len(),
        freelancers,
    }))
}

pub(crate) async fn get_freelancer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FreelancerProfile>> {
    let card = load_cards(&state.db.pool, Some(&id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("Freelancer not found".to_string()))?;

    let portfolio = sqlx::query_as::<_, PortfolioItem>(
        "SELECT * FROM portfolio WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(&id)
    .fetch_all(&state.db.pool)
    .await?;

    let ratings = sqlx::query_as::<_, Rating>(
        "SELECT * FROM ratings WHERE ratee_id = ? ORDER BY created_at DESC",
    )
    .bind(&id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(FreelancerProfile {
        card,
        portfolio,
        ratings,
    }))
}
