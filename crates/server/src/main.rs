use std::net::SocketAddr;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use services::{hub::MessageHub, storage::StorageService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gigboard_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return Err(err.into());
        }
    };

    let storage = StorageService::new(&config.storage_path, &config.public_url);
    storage.init().await?;

    let db = db::Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    let state = AppState {
        db,
        config: config.clone(),
        hub: MessageHub::new(),
        storage,
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    // Require a bearer token
    let protected_routes = Router::new()
        .nest("/auth", routes::auth::protected_router())
        .nest("/tasks", routes::tasks::router())
        .merge(routes::applications::router())
        .merge(routes::ratings::router())
        .nest("/conversations", routes::conversations::router())
        .nest("/profile", routes::profile::router())
        .nest("/notifications", routes::notifications::router())
        .nest("/storage", routes::storage::router())
        .nest("/admin", routes::admin::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let public_routes = Router::new()
        .nest("/auth", routes::auth::router())
        .nest("/tasks", routes::tasks::public_router())
        .nest("/freelancers", routes::freelancers::router())
        .merge(routes::ratings::public_router())
        .merge(routes::profile::reference_router());

    let api_router = public_routes.merge(protected_routes);
    let stored_files = ServeDir::new(state.storage.base_path());

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(handlers::ws::ws_handler))
        .nest("/api", api_router)
        .nest_service("/storage", stored_files)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Clone)]
pub struct AppState {
    pub db: db::Database,
    pub config: config::Config,
    pub hub: MessageHub,
    pub storage: StorageService,
}
