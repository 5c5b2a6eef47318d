// File storage backed by a local directory that is also served publicly
// under `/storage`.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Every upload lands below this prefix inside the storage root.
pub const UPLOAD_PREFIX: &str = "uploads";
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredObject {
    pub file_name: String,
    /// Path relative to the storage root, always `/`-separated.
    pub path: String,
    pub url: String,
    pub size_bytes: i64,
}

#[derive(Clone)]
pub struct StorageService {
    base_path: PathBuf,
    public_url: String,
}

impl StorageService {
    pub fn new(base_path: impl Into<PathBuf>, public_url: &str) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(self.base_path.join(UPLOAD_PREFIX))
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create storage directory: {e}")))?;
        Ok(())
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("{}/storage/{}", self.public_url, path)
    }

    /// Stores `data` under `uploads/<owner_id>/<uuid>-<name>` and returns its public URL.
    pub async fn upload(&self, owner_id: &str, file_name: &str, data: &[u8]) -> Result<StoredObject> {
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::Validation(format!(
                "File {file_name} exceeds the {} MB limit",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            )));
        }

        let owner = sanitize_file_name(owner_id);
        let name = sanitize_file_name(file_name);
        let relative = format!("{UPLOAD_PREFIX}/{owner}/{}-{name}", Uuid::new_v4());
        let full_path = self.base_path.join(&relative);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to create directories: {e}")))?;
        }

        fs::write(&full_path, data)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write file: {e}")))?;

        tracing::info!(path = %relative, bytes = data.len(), "stored upload");

        Ok(StoredObject {
            file_name: file_name.to_string(),
            url: self.public_url(&relative),
            path: relative,
            size_bytes: data.len() as i64,
        })
    }

    /// Whether `url` points at an object this service stored.
    pub fn owns_url(&self, url: &str) -> bool {
        url.strip_prefix(&self.public_url)
            .and_then(|rest| rest.strip_prefix("/storage/"))
            .is_some_and(|path| path.starts_with(UPLOAD_PREFIX) && !path.contains(".."))
    }
}

/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
/// Leading dots are stripped so names can never escape or hide.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
