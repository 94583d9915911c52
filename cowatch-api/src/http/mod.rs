// Module: http
// REST endpoints for session management plus the session WebSocket

pub mod error;
pub mod files;
pub mod health;
pub mod sessions;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use cowatch_core::{Config, SessionStore};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub config: Arc<Config>,
}

/// Create the HTTP router with all routes
pub fn create_router(store: SessionStore, config: Arc<Config>) -> Router {
    let state = AppState { store, config };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::create_health_router())
        .route("/api/sessions", post(sessions::create_session))
        .route(
            "/api/sessions/{session_id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route(
            "/api/sessions/{session_id}/ws",
            get(websocket::websocket_handler),
        )
        .route(
            "/api/sessions/{session_id}/public/{*path}",
            get(files::serve_public_file),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
