use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::storage::{StoredObject, MAX_UPLOAD_BYTES},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
}

// Room for a few files at the per-file limit.
const MAX_REQUEST_BYTES: usize = 4 * MAX_UPLOAD_BYTES;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: Vec<StoredObject>,
    pub errors: Vec<String>,
}

async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut uploaded = Vec::new();
    let mut errors = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        let file_name = match field.file_name() {
            Some(name) => name.to_string(),
            None => {
                errors.push("File field missing filename".to_string());
                continue;
            }
        };

        let data = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                errors.push(format!("Failed to read file {file_name}: {e}"));
                continue;
            }
        };

        match state.storage.upload(&user.id, &file_name, &data).await {
            Ok(stored) => uploaded.push(stored),
            Err(AppError::Validation(msg)) => errors.push(msg),
            Err(e) => return Err(e),
        }
    }

    if uploaded.is_empty() && errors.is_empty() {
        return Err(AppError::BadRequest("No files were uploaded".to_string()));
    }

    Ok(Json(UploadResponse { uploaded, errors }))
}
