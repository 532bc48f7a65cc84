//! Mapping of pipeline errors onto HTTP responses

use aggregator_lib::DetectionError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// Body was not valid JSON or did not match the expected shape
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Detection(err) => match err {
                DetectionError::Validation(_) => StatusCode::BAD_REQUEST,
                DetectionError::UnknownNode(_) => StatusCode::NOT_FOUND,
                DetectionError::NoTrainedNodes => StatusCode::INTERNAL_SERVER_ERROR,
                DetectionError::ArbitrationUnavailable(_) => StatusCode::BAD_GATEWAY,
                // Node failures are absorbed into notices by the pipeline, so
                // one reaching a handler is treated as an internal fault.
                DetectionError::NodeUnavailable { .. } | DetectionError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidBody(_) => "VALIDATION_ERROR",
            ApiError::Detection(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Detection(DetectionError::Internal(msg)) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            ApiError::Detection(err @ DetectionError::NodeUnavailable { .. }) => {
                tracing::error!("Unabsorbed node failure: {}", err);
                "Internal server error".to_string()
            }
            ApiError::Detection(DetectionError::ArbitrationUnavailable(msg)) => {
                tracing::warn!("Rule evaluator unavailable: {}", msg);
                self.to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
