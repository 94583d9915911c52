//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(health_check))
}

/// Always OK while the server runs; reports the live session count.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.store.len(),
    }))
}
