//! # Error Handling
//!
//! This module defines the custom error type for the service and how each variant
//! is turned into an HTTP response.
//!
//! ## Error Taxonomy:
//! - **UnsupportedMediaType**: the declared type is not on the allow-list (400).
//!   Raised before any byte reaches storage.
//! - **MissingUpload**: the multipart body has no `file` part (400).
//! - **PayloadTooLarge**: the upload ran past the configured limit (413).
//! - **Transcode**: the external transcoder failed (500). The original file is
//!   still on disk.
//! - **Storage**: the music directory could not be read or written (500).
//! - **NotFound / BadRequest / Internal / ConfigError**: the usual suspects.
//!
//! ## JSON Response Format:
//! Client errors carry only a message:
//! ```json
//! { "message": "No file uploaded" }
//! ```
//! Server errors also carry the underlying cause:
//! ```json
//! { "message": "Error during file conversion", "error": "ffmpeg exited with status 1: ..." }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Rust Concepts:
/// - **enum**: A type that can be one of several variants
/// - **String**: Each variant holds an error message
/// - **#[derive(Debug)]**: Automatically implements debug printing
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::MissingUpload);
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors that don't fit anywhere else
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Declared upload type is not on the allow-list
    UnsupportedMediaType(String),

    /// No file part in the upload
    MissingUpload,

    /// Upload exceeded the configured size limit
    PayloadTooLarge(String),

    /// External transcoder reported a failure
    Transcode(String),

    /// Music directory unreadable or unwritable
    Storage(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::UnsupportedMediaType(msg) => write!(f, "Unsupported media type: {}", msg),
            AppError::MissingUpload => write!(f, "No file uploaded"),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::Transcode(msg) => write!(f, "Transcode failed: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Client-facing message and, for server-side failures, the underlying cause.
    fn body_parts(&self) -> (String, Option<String>) {
        match self {
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::UnsupportedMediaType(msg)
            | AppError::PayloadTooLarge(msg) => (msg.clone(), None),
            AppError::MissingUpload => ("No file uploaded".to_string(), None),
            AppError::Transcode(cause) => {
                ("Error during file conversion".to_string(), Some(cause.clone()))
            }
            AppError::Storage(cause) => ("Storage error".to_string(), Some(cause.clone())),
            AppError::ConfigError(cause) => {
                ("Configuration error".to_string(), Some(cause.clone()))
            }
            AppError::Internal(cause) => ("Internal server error".to_string(), Some(cause.clone())),
        }
    }
}

/// Converts our errors into the JSON responses clients see.
///
/// ## HTTP Status Code Mapping:
/// - UnsupportedMediaType / MissingUpload / BadRequest → 400
/// - NotFound → 404
/// - PayloadTooLarge → 413
/// - Transcode / Storage / Internal / ConfigError → 500
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::UnsupportedMediaType(_)
            | AppError::MissingUpload => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_)
            | AppError::ConfigError(_)
            | AppError::Transcode(_)
            | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (message, cause) = self.body_parts();
        let body = match cause {
            Some(error) => json!({ "message": message, "error": error }),
            None => json!({ "message": message }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// When you use `?` with an anyhow::Error, it automatically becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Filesystem failures surface as storage errors (500).
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// A malformed multipart body is the client's fault.
impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.error_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn test_client_errors_carry_only_message() {
        let (status, body) = body_json(AppError::MissingUpload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "message": "No file uploaded" }));

        let (status, body) =
            body_json(AppError::UnsupportedMediaType("Unsupported file type!".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("error").is_none());
    }

    #[actix_web::test]
    async fn test_transcode_error_carries_cause() {
        let (status, body) = body_json(AppError::Transcode("codec not found".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Error during file conversion");
        assert_eq!(body["error"], "codec not found");
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::PayloadTooLarge("x".into()).status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
