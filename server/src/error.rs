use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Errors surfaced to the HTTP caller. Every variant renders as `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    OperationFailed(String),
}

impl ApiError {
    pub fn required(field: &str) -> Self {
        ApiError::InvalidRequest(format!("{} required", field))
    }

    /// Wraps a database-layer failure, keeping the whole context chain in the message.
    pub fn operation(err: anyhow::Error) -> Self {
        ApiError::OperationFailed(format!("{:#}", err))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::OperationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
        }));

        if let ApiError::MethodNotAllowed = self {
            return (status, [(header::ALLOW, "POST")], body).into_response();
        }
        (status, body).into_response()
    }
}
