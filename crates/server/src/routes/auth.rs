use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::models::{User, UserRole},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

/// Routes reachable without a token.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: UserRole,
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub exp: usize,
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn create_token(user: &User, secret: &str) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::days(7))
        .ok_or_else(|| AppError::Internal("Token expiry overflow".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

pub(crate) async fn fetch_user(pool: &sqlx::SqlitePool, id: &str) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

pub(crate) fn validate_hourly_rate(rate: Option<f64>) -> Result<()> {
    match rate {
        Some(r) if !r.is_finite() || r < 0.0 => Err(AppError::Validation(
            "Hourly rate must be a non-negative number".to_string(),
        )),
        _ => Ok(()),
    }
}

pub(crate) async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>> {
    let email = body.email.trim().to_lowercase();

    // Validate input
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    if body.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    if body.role == UserRole::Admin {
        return Err(AppError::Forbidden(
            "Admin accounts cannot be self-registered".to_string(),
        ));
    }
    validate_hourly_rate(body.hourly_rate)?;

    // Check if user already exists
    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(&state.db.pool)
        .await?;

    if existing > 0 {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let password_hash = hash_password(&body.password)?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        email,
        name: body.name.trim().to_string(),
        password_hash,
        role: body.role,
        bio: body.bio.filter(|b| !b.trim().is_empty()),
        // Hourly rates only make sense for freelancers.
        hourly_rate: body.hourly_rate.filter(|_| body.role == UserRole::Freelancer),
        is_blocked: false,
        block_reason: None,
        blocked_at: None,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO users (id, email, name, password_hash, role, bio, hourly_rate, is_blocked, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, FALSE, ?)
        "#,
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.name)
    .bind(&user.password_hash)
    .bind(user.role)
    .bind(&user.bio)
    .bind(user.hourly_rate)
    .bind(user.created_at)
    .execute(&state.db.pool)
    .await?;

    tracing::info!(user_id = %user.id, role = %user.role, "registered user");

    let token = create_token(&user, &state.config.jwt_secret)?;

    Ok(Json(AuthResponse { token, user }))
}

pub(crate) async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(body.email.trim().to_lowercase())
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !verify_password(&body.password, &user.password_hash)? {
        return Err(AppError::Unauthorized);
    }

    if user.is_blocked {
        return Err(AppError::Blocked(
            user.block_reason.clone().unwrap_or_default(),
        ));
    }

    let token = create_token(&user, &state.config.jwt_secret)?;

    Ok(Json(AuthResponse { token, user }))
}

async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<User>> {
    Ok(Json(fetch_user(&state.db.pool, &user.id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        middleware::auth::{authenticate, decode_token},
        test_support::{block_user, test_state},
    };

    fn register_request(email: &str, role: UserRole) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            name: "Oksana".to_string(),
            password: "correct horse".to_string(),
            role,
            bio: None,
            hourly_rate: Some(450.0),
        }
    }

    #[tokio::test]
    async fn register_then_login_issues_valid_tokens() {
        let state = test_state().await;

        let Json(registered) = register(
            State(state.clone()),
            Json(register_request("Oksana@Example.com", UserRole::Freelancer)),
        )
        .await
        .unwrap();
        assert_eq!(registered.user.email, "oksana@example.com");
        assert_eq!(registered.user.hourly_rate, Some(450.0));

        let Json(logged_in) = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "oksana@example.com".to_string(),
                password: "correct horse".to_string(),
            }),
        )
        .await
        .unwrap();

        let claims = decode_token(&logged_in.token, &state.config.jwt_secret).unwrap();
        assert_eq!(claims.sub, registered.user.id);
        assert_eq!(claims.role, UserRole::Freelancer);
    }

    #[tokio::test]
    async fn clients_do_not_keep_an_hourly_rate() {
        let state = test_state().await;
        let Json(registered) = register(
            State(state),
            Json(register_request("client@example.com", UserRole::Client)),
        )
        .await
        .unwrap();
        assert_eq!(registered.user.hourly_rate, None);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let state = test_state().await;
        register(
            State(state.clone()),
            Json(register_request("dup@example.com", UserRole::Client)),
        )
        .await
        .unwrap();

        let err = register(
            State(state),
            Json(register_request("dup@example.com", UserRole::Freelancer)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn admin_role_cannot_be_self_assigned() {
        let state = test_state().await;
        let err = register(
            State(state),
            Json(register_request("root@example.com", UserRole::Admin)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let state = test_state().await;
        register(
            State(state.clone()),
            Json(register_request("a@example.com", UserRole::Client)),
        )
        .await
        .unwrap();

        let err = login(
            State(state),
            Json(LoginRequest {
                email: "a@example.com".to_string(),
                password: "wrong password".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn blocked_users_cannot_sign_in_or_use_tokens() {
        let state = test_state().await;
        let Json(registered) = register(
            State(state.clone()),
            Json(register_request("spam@example.com", UserRole::Freelancer)),
        )
        .await
        .unwrap();

        block_user(&state, &registered.user.id, "spam").await;

        let err = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "spam@example.com".to_string(),
                password: "correct horse".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Blocked(ref reason) if reason == "spam"));

        let err = authenticate(&state, &registered.token).await.unwrap_err();
        assert!(matches!(err, AppError::Blocked(_)));
    }
}
