//! Error types for attachment storage

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Storage-wide result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Configuration errors. Never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read storage configuration {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed storage configuration {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("No '{environment}' section in storage configuration {path}")]
    MissingEnvironment { path: PathBuf, environment: String },

    #[error("Missing storage setting: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("S3 connection failed: {0}")]
    Connection(String),

    #[error("Cannot create bucket {bucket}: {message}")]
    Bucket { bucket: String, message: String },

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("MD5 mismatch for file {key}, local={local}, S3={remote}")]
    Transfer {
        key: String,
        local: String,
        remote: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether running the same operation again could succeed.
    /// Configuration and caller mistakes never go away on their own.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StorageError::Config(_) | StorageError::InvalidInput(_))
    }
}

/// HTTP-facing error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                match e {
                    StorageError::ObjectNotFound(key) => (
                        StatusCode::NOT_FOUND,
                        "not_found",
                        format!("Object not found: {}", key),
                    ),
                    StorageError::InvalidInput(msg) => {
                        (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
                    }
                    StorageError::Transfer { key, .. } => (
                        StatusCode::BAD_GATEWAY,
                        "transfer_error",
                        format!("Upload of {} could not be verified", key),
                    ),
                    StorageError::Connection(_) | StorageError::Bucket { .. } => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "storage_unavailable",
                        "Storage unavailable".to_string(),
                    ),
                    StorageError::Config(_) | StorageError::Io(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "storage_error",
                        "Storage error".to_string(),
                    ),
                }
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
