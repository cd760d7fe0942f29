//! Error types for the Rill server.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use rill_core::Error as CoreError;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Core engine error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or malformed credentials.
    #[error("authentication required")]
    Unauthenticated,

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Core(CoreError::NotebookNotFound(_)) | Self::Core(CoreError::CellNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Self::Core(CoreError::Forbidden) => StatusCode::FORBIDDEN,
            Self::Core(CoreError::RevisionConflict { .. }) => StatusCode::CONFLICT,
            Self::Core(CoreError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::Core(CoreError::NotebookNotFound("n".to_string())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Core(CoreError::RevisionConflict {
                expected: 5,
                actual: 6
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::Core(CoreError::Forbidden).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ServerError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }
}
