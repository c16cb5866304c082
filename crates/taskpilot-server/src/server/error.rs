//! Mapping from task errors to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::error::TaskError;

/// A [`TaskError`] rendered as `{"error": "..."}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(pub TaskError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            TaskError::Validation(_) | TaskError::EmptyPrompt => StatusCode::BAD_REQUEST,
            TaskError::NotFound(_) => StatusCode::NOT_FOUND,
            TaskError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
