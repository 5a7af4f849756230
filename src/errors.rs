use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Error type for session, mutation, parsing, and agent failures.
#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("agent error: {0}")]
    Agent(String),
    #[error("export error: {0}")]
    Export(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WorkbenchError {
    pub fn not_found(what: impl Into<String>) -> Self {
        WorkbenchError::NotFound(what.into())
    }

    pub fn invalid(why: impl Into<String>) -> Self {
        WorkbenchError::InvalidArgument(why.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            WorkbenchError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkbenchError::InvalidArgument(_) | WorkbenchError::Parse(_) => {
                StatusCode::BAD_REQUEST
            }
            WorkbenchError::Conflict(_) => StatusCode::CONFLICT,
            WorkbenchError::Agent(_) => StatusCode::BAD_GATEWAY,
            WorkbenchError::Export(_) | WorkbenchError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WorkbenchError {
    fn into_response(self) -> Response {
        let status = self.status();
        log::warn!("request failed: {self}");
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
