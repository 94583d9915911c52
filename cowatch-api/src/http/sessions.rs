//! Session management endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use cowatch_core::models::SessionId;
use cowatch_core::session::SessionSnapshot;
use serde::Serialize;
use tracing::info;

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub id: String,
}

/// `POST /api/sessions`
pub async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let session = state.store.create().await;
    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            id: session.id().to_string(),
        }),
    )
}

/// `GET /api/sessions/{id}`
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<SessionSnapshot>> {
    let session_id = SessionId::from(session_id.as_str());
    let session = state
        .store
        .peek(&session_id)
        .ok_or_else(|| AppError::session_not_found(&session_id))?;
    Ok(Json(session.snapshot().await))
}

/// `DELETE /api/sessions/{id}`: disconnects everyone and releases the
/// session's media.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<StatusCode> {
    let session_id = SessionId::from(session_id.as_str());
    if state.store.remove(&session_id).await {
        info!(session_id = %session_id, "Session deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::session_not_found(&session_id))
    }
}
