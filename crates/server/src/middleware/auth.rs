use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::{
    db::models::UserRole,
    error::{AppError, Result},
    routes::auth::Claims,
    AppState,
};

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn require_role(&self, role: UserRole, action: &str) -> Result<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("Only a {role} can {action}")))
        }
    }

    pub fn require_admin(&self) -> Result<()> {
        self.require_role(UserRole::Admin, "perform admin actions")
    }
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized)
}

/// Resolves the bearer token into a live user; blocked accounts are
/// refused even while their token is still valid.
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser> {
    let claims = decode_token(token, &state.config.jwt_secret)?;

    let (role, is_blocked, block_reason) =
        sqlx::query_as::<_, (UserRole, bool, Option<String>)>(
            "SELECT role, is_blocked, block_reason FROM users WHERE id = ?",
        )
        .bind(&claims.sub)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if is_blocked {
        return Err(AppError::Blocked(block_reason.unwrap_or_default()));
    }

    Ok(AuthUser {
        id: claims.sub,
        email: claims.email,
        name: claims.name,
        role,
    })
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AppError::Unauthorized)?;
    let user = authenticate(&state, bearer.token()).await?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

// Extractor for getting the authenticated user from request extensions
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
