use chrono::Utc;
use uuid::Uuid;

use crate::{
    config::Config,
    db::{models::UserRole, Database},
    middleware::auth::AuthUser,
    services::{hub::MessageHub, storage::StorageService},
    AppState,
};

pub async fn test_database() -> Database {
    let db = Database::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    db
}

pub async fn test_state() -> AppState {
    let storage_path = std::env::temp_dir().join(format!("gigboard-test-{}", Uuid::new_v4()));
    let config = Config {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        storage_path: storage_path.to_string_lossy().to_string(),
        public_url: "http://localhost:3000".to_string(),
        jwt_secret: "test-secret".to_string(),
    };

    AppState {
        db: test_database().await,
        storage: StorageService::new(&storage_path, &config.public_url),
        hub: MessageHub::new(),
        config,
    }
}

/// Inserts a user directly, bypassing password hashing.
pub async fn create_user(state: &AppState, role: UserRole, name: &str) -> AuthUser {
    let id = Uuid::new_v4().to_string();
    let email = format!("{}-{}@example.com", name.to_lowercase(), &id[..8]);

    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role, is_blocked, created_at) VALUES (?, ?, ?, 'x', ?, FALSE, ?)",
    )
    .bind(&id)
    .bind(&email)
    .bind(name)
    .bind(role)
    .bind(Utc::now())
    .execute(&state.db.pool)
    .await
    .unwrap();

    AuthUser {
        id,
        email,
        name: name.to_string(),
        role,
    }
}

pub async fn block_user(state: &AppState, user_id: &str, reason: &str) {
    sqlx::query("UPDATE users SET is_blocked = TRUE, block_reason = ?, blocked_at = ? WHERE id = ?")
        .bind(reason)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&state.db.pool)
        .await
        .unwrap();
}
