//! Files under a session's `public/` tree (manifests, segments, subtitles,
//! fonts, linked media).

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
};
use cowatch_core::models::SessionId;
use std::path::{Component, PathBuf};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::http::{AppError, AppResult, AppState};

/// `GET /api/sessions/{id}/public/{*path}`
pub async fn serve_public_file(
    State(state): State<AppState>,
    Path((session_id, path)): Path<(String, String)>,
    request: Request<Body>,
) -> AppResult<Response> {
    let session_id = SessionId::from(session_id.as_str());
    let session = state
        .store
        .peek(&session_id)
        .ok_or_else(|| AppError::session_not_found(&session_id))?;

    let relative = public_relative_path(&path)
        .ok_or_else(|| AppError::bad_request(format!("Invalid path: {path}")))?;
    let file = session.dirs().public().join(relative);

    match ServeFile::new(file).oneshot(request).await {
        Ok(response) => Ok(response.into_response()),
        Err(e) => Err(AppError::internal("Failed to serve public file", e)),
    }
}

/// Only plain relative components are allowed
fn public_relative_path(path: &str) -> Option<PathBuf> {
    let path = PathBuf::from(path);
    if path.as_os_str().is_empty() {
        return None;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_relative_path() {
        assert_eq!(
            public_relative_path("media-abc/movie.mp4"),
            Some(PathBuf::from("media-abc/movie.mp4"))
        );
        assert!(public_relative_path("../secret").is_none());
        assert!(public_relative_path("/etc/passwd").is_none());
        assert!(public_relative_path("a/../../b").is_none());
        assert!(public_relative_path("").is_none());
    }
}
