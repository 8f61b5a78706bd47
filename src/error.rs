//! HTTP error mapping for upserver

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::upload::UploadError;

/// Handler result type
pub type Result<T> = std::result::Result<T, UploadError>;

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            UploadError::StorageFailure(e) => {
                tracing::error!("Storage error: {}", e);
                "Storage error".to_string()
            }
            other => {
                tracing::debug!(code = other.code(), "Request rejected: {}", other);
                other.to_string()
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code: self.code().to_string(),
        });

        let mut response = (status, body).into_response();

        if let UploadError::RangeNotSatisfiable(total) = self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", total)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }

        response
    }
}
