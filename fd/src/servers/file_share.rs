//! File share server
//!
//! Serves a root directory (or a single file) over HTTP with optional write
//! endpoints. Safety rule: every requested path must resolve inside the
//! shared root; anything else is rejected with 403 before touching the
//! filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Share configuration supplied by the starting workflow node.
#[derive(Debug, Clone)]
pub struct FileShareConfig {
    /// Folder to share, or a single file.
    pub root: PathBuf,
    /// Display name shown to clients.
    pub name: String,
    /// Enable upload/mkdir/delete endpoints.
    pub allow_write: bool,
}

struct ShareState {
    root: PathBuf,
    name: String,
    allow_write: bool,
    single_file: bool,
}

#[derive(Debug, Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Debug, Serialize)]
struct DirEntry {
    name: String,
    is_dir: bool,
    size: u64,
    size_text: String,
}

/// Human-readable byte size.
pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = size as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return if unit == "B" {
                format!("{size}B")
            } else {
                format!("{value:.1}{unit}")
            };
        }
        value /= 1024.0;
    }
    format!("{value:.1}TB")
}

/// Build the share router. Fails when the root does not exist.
pub fn file_share_router(config: FileShareConfig) -> Result<Router, EngineError> {
    let root = config
        .root
        .canonicalize()
        .map_err(|e| EngineError::validation(format!("share root {}: {e}", config.root.display())))?;
    let single_file = root.is_file();

    let state = Arc::new(ShareState {
        root,
        name: config.name,
        allow_write: config.allow_write && !single_file,
        single_file,
    });

    Ok(Router::new()
        .route("/", get(share_info))
        .route("/list", get(list_dir))
        .route("/download", get(download))
        .route("/upload", post(upload))
        .route("/mkdir", post(mkdir))
        .route("/delete", delete(remove))
        .with_state(state))
}

/// Resolve a client-supplied relative path inside the root.
///
/// `allow_missing` permits a non-existent final component (upload/mkdir
/// targets); its parent must still exist and sit inside the root.
fn resolve_inside(root: &Path, relative: &str, allow_missing: bool) -> Result<PathBuf, StatusCode> {
    let relative = relative.trim_start_matches('/');
    let joined = root.join(relative);

    let canonical = if allow_missing && !joined.exists() {
        let parent = joined.parent().ok_or(StatusCode::FORBIDDEN)?;
        let file_name = joined.file_name().ok_or(StatusCode::FORBIDDEN)?;
        parent
            .canonicalize()
            .map_err(|_| StatusCode::FORBIDDEN)?
            .join(file_name)
    } else {
        joined.canonicalize().map_err(|_| StatusCode::NOT_FOUND)?
    };

    if canonical.starts_with(root) {
        Ok(canonical)
    } else {
        warn!(requested = %relative, "file share: path escapes the shared root");
        Err(StatusCode::FORBIDDEN)
    }
}

async fn share_info(State(state): State<Arc<ShareState>>) -> impl IntoResponse {
    Json(json!({
        "name": state.name,
        "single_file": state.single_file,
        "allow_write": state.allow_write,
    }))
}

async fn list_dir(
    State(state): State<Arc<ShareState>>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<DirEntry>>, StatusCode> {
    if state.single_file {
        return Err(StatusCode::NOT_FOUND);
    }
    let dir = resolve_inside(&state.root, &query.path, false)?;
    if !dir.is_dir() {
        return Err(StatusCode::NOT_FOUND);
    }

    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(&dir).await.map_err(|_| StatusCode::NOT_FOUND)?;
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        let size = if meta.is_file() { meta.len() } else { 0 };
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size,
            size_text: format_size(size),
        });
    }
    // Directories first, then case-insensitive by name.
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    Ok(Json(entries))
}

async fn download(
    State(state): State<Arc<ShareState>>,
    Query(query): Query<PathQuery>,
) -> Result<Vec<u8>, StatusCode> {
    let file = if state.single_file {
        state.root.clone()
    } else {
        resolve_inside(&state.root, &query.path, false)?
    };
    if !file.is_file() {
        return Err(StatusCode::NOT_FOUND);
    }
    debug!(file = %file.display(), "file share: download");
    tokio::fs::read(&file).await.map_err(|_| StatusCode::NOT_FOUND)
}

async fn upload(
    State(state): State<Arc<ShareState>>,
    Query(query): Query<PathQuery>,
    body: axum::body::Bytes,
) -> Result<StatusCode, StatusCode> {
    if !state.allow_write {
        return Err(StatusCode::FORBIDDEN);
    }
    let filename = query.filename.as_deref().ok_or(StatusCode::BAD_REQUEST)?;
    if filename.contains('/') || filename.contains("..") {
        return Err(StatusCode::FORBIDDEN);
    }
    let dir = resolve_inside(&state.root, &query.path, false)?;
    if !dir.is_dir() {
        return Err(StatusCode::NOT_FOUND);
    }
    let target = dir.join(filename);
    debug!(target = %target.display(), bytes = body.len(), "file share: upload");
    tokio::fs::write(&target, &body)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::CREATED)
}

async fn mkdir(
    State(state): State<Arc<ShareState>>,
    Query(query): Query<PathQuery>,
) -> Result<StatusCode, StatusCode> {
    if !state.allow_write {
        return Err(StatusCode::FORBIDDEN);
    }
    if query.path.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let target = resolve_inside(&state.root, &query.path, true)?;
    tokio::fs::create_dir_all(&target)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::CREATED)
}

async fn remove(
    State(state): State<Arc<ShareState>>,
    Query(query): Query<PathQuery>,
) -> Result<StatusCode, StatusCode> {
    if !state.allow_write {
        return Err(StatusCode::FORBIDDEN);
    }
    let target = resolve_inside(&state.root, &query.path, false)?;
    if target == state.root {
        return Err(StatusCode::FORBIDDEN);
    }
    let result = if target.is_dir() {
        tokio::fs::remove_dir_all(&target).await
    } else {
        tokio::fs::remove_file(&target).await
    };
    result.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}
