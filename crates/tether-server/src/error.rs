use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::runs::RunError;
use crate::scenarios::UnknownScenario;

/// Failures surfaced at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        ApiError::NotFound(e.to_string())
    }
}

impl From<UnknownScenario> for ApiError {
    fn from(e: UnknownScenario) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}
