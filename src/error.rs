use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::error;

use crate::models::response::ApiResponse;

/// Failures surfaced to the HTTP caller before a delivery outcome exists.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("Could not find a free key in the notification store after {attempts} attempts")]
    StoreExhausted { attempts: usize },

    #[error("Failed to publish notification to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    #[error("{0}")]
    Internal(String),

    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match self {
            GatewayError::Validation(message) => {
                ApiResponse::<()>::error("validation_error".to_string(), message)
            }
            other => {
                error!(error = %other, "Notification dispatch failed");
                ApiResponse::<()>::error(
                    "internal_error".to_string(),
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
