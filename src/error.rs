//! Error types for crypt-proxy
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//! Upstream details are logged but never returned to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// Every failure is terminal for the request that produced it.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed multipart body, missing file part or invalid identifier (400)
    #[error("Parse error: {0}")]
    Parse(String),

    /// More than one file part in a single upload (400)
    #[error("Only a single file may be uploaded per request")]
    MultipleFiles,

    /// Upload exceeds the configured size limit (413)
    #[error("Payload too large")]
    PayloadTooLarge,

    /// The metadata layer rejected the caller (403)
    #[error("Access denied")]
    PermissionDenied,

    /// Metadata record does not exist (404)
    #[error("Resource not found")]
    NotFound,

    /// Transport failure talking to storage or metadata API (503)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Non-success response from a backend (502)
    #[error("Backend error {code}: {message}")]
    Backend { code: String, message: String },

    /// Request deadline elapsed (504)
    #[error("Request deadline exceeded")]
    Timeout,

    /// Ciphertext could not be authenticated (500)
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub(crate) fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Stable label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Parse(_) => "parse",
            AppError::MultipleFiles => "multiple_files",
            AppError::PayloadTooLarge => "payload_too_large",
            AppError::PermissionDenied => "permission_denied",
            AppError::NotFound => "not_found",
            AppError::BackendUnavailable(_) => "backend_unavailable",
            AppError::Backend { .. } => "backend",
            AppError::Timeout => "timeout",
            AppError::Decryption(_) => "decryption",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Parse(_) | AppError::MultipleFiles => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::PermissionDenied => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Backend { .. } => StatusCode::BAD_GATEWAY,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Decryption(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge
        } else {
            AppError::Parse(format!("Failed to parse multipart: {}", err.body_text()))
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            AppError::BackendUnavailable(err.to_string())
        } else if let Some(status) = err.status() {
            AppError::backend(status.as_str(), err.to_string())
        } else {
            AppError::BackendUnavailable(err.to_string())
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Client errors carry a short description; server errors carry a
    /// generic message and the detail goes to the log.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status();
        let error_type = self.kind();

        let error_message = match &self {
            AppError::Parse(msg) => msg.clone(),
            AppError::MultipleFiles
            | AppError::PayloadTooLarge
            | AppError::PermissionDenied
            | AppError::NotFound
            | AppError::Timeout => self.to_string(),
            AppError::BackendUnavailable(_) => "Backend unavailable".to_string(),
            AppError::Backend { .. } => "Backend request failed".to_string(),
            AppError::Decryption(_) => "Stored file could not be decrypted".to_string(),
            AppError::Config(_) | AppError::Internal(_) => "Internal server error".to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, error_type, "Request failed");
        } else {
            tracing::debug!(error = %self, error_type, "Request rejected");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
