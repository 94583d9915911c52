//! HTTP error responses
//!
//! Every failure is rendered as `{"error": ..., "status": ...}`. Server-side
//! failures are logged here and reach the client only as a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

use cowatch_core::models::SessionId;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, message)
    }

    pub fn session_not_found(id: &SessionId) -> Self {
        Self::not_found(format!("Session {id} not found"))
    }

    /// Log `err` and answer 500 without its detail.
    pub fn internal(context: &str, err: impl fmt::Display) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            status: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<cowatch_core::Error> for AppError {
    fn from(err: cowatch_core::Error) -> Self {
        use cowatch_core::Error;

        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Authorization(_) => StatusCode::FORBIDDEN,
            // A full session is a conflict with its current membership.
            Error::Conflict(_) | Error::SessionFull(_) => StatusCode::CONFLICT,
            _ => return Self::internal("Session operation failed", &err),
        };
        match err {
            Error::NotFound(msg)
            | Error::InvalidInput(msg)
            | Error::Authorization(msg)
            | Error::Conflict(msg)
            | Error::SessionFull(msg) => Self::with_status(status, msg),
            other => Self::with_status(status, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_core_errors_map_to_status() {
        let cases = [
            (cowatch_core::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (cowatch_core::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (cowatch_core::Error::Authorization("x".into()), StatusCode::FORBIDDEN),
            (cowatch_core::Error::SessionFull("x".into()), StatusCode::CONFLICT),
            (
                cowatch_core::Error::Process("transcoder crashed".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_client_errors_keep_their_message() {
        let err = AppError::from(cowatch_core::Error::SessionFull("8 clients".into()));
        assert_eq!(err.message, "8 clients");
        assert_eq!(
            AppError::session_not_found(&SessionId::from("room")).message,
            "Session room not found"
        );
    }

    #[tokio::test]
    async fn test_internal_errors_hide_detail_in_body() {
        let response =
            AppError::from(cowatch_core::Error::Internal("secret detail".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], 500);
        assert!(!body["error"].as_str().unwrap().contains("secret"));
    }
}
