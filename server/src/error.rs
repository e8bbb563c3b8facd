//! JSON error responses
//!
//! Every failure leaves the server as `{"error": "<message>"}` with a status
//! code matching its cause.

use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use coffee_defect::CoffeeDefectError;

#[derive(Debug)]
pub enum ApiError {
    /// No multipart field named `file`
    NoFile,
    /// Upload is empty or not a decodable image
    InvalidImage(String),
    /// Multipart body could not be read; carries its own status (400 or 413)
    Multipart(StatusCode, String),
    /// Inference failed for a reason the client cannot fix
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoFile | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::Multipart(status, _) => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::NoFile => "no file".to_string(),
            ApiError::InvalidImage(msg) => msg.clone(),
            ApiError::Multipart(_, msg) | ApiError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!("{}", message);
        } else {
            warn!("Rejected request ({}): {}", status, message);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<CoffeeDefectError> for ApiError {
    fn from(err: CoffeeDefectError) -> Self {
        match err {
            CoffeeDefectError::InvalidImage(_) => ApiError::InvalidImage(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Multipart(err.status(), err.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::Multipart(rejection.status(), rejection.body_text())
    }
}
