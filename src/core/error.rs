//! Error type system for the Harbor daemon
//!
//! This module provides a comprehensive error type system with:
//! - Hierarchical error classification
//! - Error context and chaining support
//! - HTTP status code mapping
//! - Detailed error messages with trace IDs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Main error type for the Harbor daemon
#[derive(Debug, thiserror::Error)]
pub enum HarborError {
    // System-level errors
    #[error("System initialization failed: {0}")]
    InitializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    // Package decoding errors
    #[error("Failed to decode plugin package at {path}: {reason}")]
    DecodeError { path: String, reason: String },

    #[error("Plugin signature verification failed: {0}")]
    VerificationError(String),

    // Runtime environment errors
    #[error("Failed to build plugin runtime environment: {reason}")]
    BuildError { reason: String, timed_out: bool },

    // Serverless launch errors
    #[error("Serverless launch failed: {0}")]
    LaunchError(String),

    // Storage errors
    #[error("Storage error: {0}")]
    StorageError(String),

    // Installation domain errors
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin is already installed: {0}")]
    AlreadyInstalled(String),

    #[error("Invalid plugin unique identifier: {0}")]
    InvalidIdentifier(String),

    // API-related errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Resource-related errors
    #[error("Timeout: {0}")]
    Timeout(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // Task / worker errors
    #[error("Task error: {0}")]
    TaskError(String),

    // Cache / lock errors
    #[error("Cache error: {0}")]
    CacheError(String),
}

impl HarborError {
    /// Build a decode error carrying the offending path
    pub fn decode(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        HarborError::DecodeError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a runtime build error
    pub fn build(reason: impl Into<String>) -> Self {
        HarborError::BuildError {
            reason: reason.into(),
            timed_out: false,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            HarborError::InvalidRequest(_)
            | HarborError::DecodeError { .. }
            | HarborError::InvalidIdentifier(_)
            | HarborError::AlreadyInstalled(_)
            | HarborError::SerializationError(_) => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            HarborError::VerificationError(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            HarborError::NotFound(_) => StatusCode::NOT_FOUND,

            // 408 Request Timeout
            HarborError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,

            // 500 Internal Server Error
            HarborError::InitializationError(_)
            | HarborError::ConfigError(_)
            | HarborError::DatabaseError(_)
            | HarborError::BuildError { .. }
            | HarborError::LaunchError(_)
            | HarborError::StorageError(_)
            | HarborError::IoError(_)
            | HarborError::TaskError(_)
            | HarborError::CacheError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            HarborError::InitializationError(_) => "InitializationError",
            HarborError::ConfigError(_) => "ConfigError",
            HarborError::DatabaseError(_) => "DatabaseError",
            HarborError::DecodeError { .. } => "DecodeError",
            HarborError::VerificationError(_) => "VerificationError",
            HarborError::BuildError { .. } => "BuildError",
            HarborError::LaunchError(_) => "LaunchError",
            HarborError::StorageError(_) => "StorageError",
            HarborError::NotFound(_) => "NotFound",
            HarborError::AlreadyInstalled(_) => "AlreadyInstalled",
            HarborError::InvalidIdentifier(_) => "InvalidIdentifier",
            HarborError::InvalidRequest(_) => "InvalidRequest",
            HarborError::Timeout(_) => "Timeout",
            HarborError::IoError(_) => "IoError",
            HarborError::SerializationError(_) => "SerializationError",
            HarborError::TaskError(_) => "TaskError",
            HarborError::CacheError(_) => "CacheError",
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarborError::DatabaseError(_)
                | HarborError::StorageError(_)
                | HarborError::Timeout(_)
                | HarborError::CacheError(_)
        )
    }
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response with a generated trace ID
    pub fn new(error: String, message: String) -> Self {
        Self {
            error,
            message,
            details: None,
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an error response with additional details
    pub fn with_details(error: String, message: String, details: serde_json::Value) -> Self {
        Self {
            error,
            message,
            details: Some(details),
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an error response from a HarborError
    pub fn from_error(error: &HarborError) -> Self {
        Self::new(error.error_type().to_string(), error.to_string())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (trace_id: {})",
            self.error, self.message, self.trace_id
        )
    }
}

/// Implement IntoResponse for HarborError to enable automatic error handling in Axum
impl IntoResponse for HarborError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::from_error(&self);

        tracing::error!(
            error_type = self.error_type(),
            trace_id = %error_response.trace_id,
            status_code = %status_code,
            "Request failed: {}",
            self
        );

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with HarborError
pub type Result<T> = std::result::Result<T, HarborError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let context_str = context.into();
            HarborError::InitializationError(format!("{}: {}", context_str, e))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let context_str = f();
            HarborError::InitializationError(format!("{}: {}", context_str, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            HarborError::InvalidRequest("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HarborError::AlreadyInstalled("alice/calc:1.0.0@abc".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HarborError::VerificationError("test".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            HarborError::NotFound("test".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HarborError::decode("manifest.yaml", "missing").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HarborError::build("pip failed").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_types() {
        assert_eq!(HarborError::NotFound("test".into()).error_type(), "NotFound");
        assert_eq!(HarborError::decode("p", "r").error_type(), "DecodeError");
        assert_eq!(
            HarborError::LaunchError("test".into()).error_type(),
            "LaunchError"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(HarborError::StorageError("test".into()).is_retryable());
        assert!(HarborError::Timeout("test".into()).is_retryable());
        assert!(!HarborError::InvalidRequest("test".into()).is_retryable());
        assert!(!HarborError::VerificationError("test".into()).is_retryable());
    }

    #[test]
    fn test_decode_error_carries_path() {
        let err = HarborError::decode("tools/tool.yaml", "yaml parse failure");
        assert!(err.to_string().contains("tools/tool.yaml"));
        assert!(err.to_string().contains("yaml parse failure"));
    }

    #[test]
    fn test_error_response_creation() {
        let error = HarborError::NotFound("alice/calc".into());
        let response = ErrorResponse::from_error(&error);

        assert_eq!(response.error, "NotFound");
        assert!(response.message.contains("alice/calc"));
        assert!(!response.trace_id.is_empty());
        assert!(response.details.is_none());
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        let contexted = result.context("Failed to read plugin package");

        assert!(contexted.is_err());
        let err = contexted.unwrap_err();
        assert!(err.to_string().contains("Failed to read plugin package"));
        assert!(err.to_string().contains("file not found"));
    }
}
