use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    /// Upstream credential is expired or revoked. The owning connection must
    /// be relinked by the user; never retried automatically.
    #[error("Upstream authorization expired: {0}")]
    AuthExpired(String),

    /// Retryable network or upstream 5xx failure.
    #[error("Transient upstream error: {0}")]
    Transient(anyhow::Error),

    /// Key mismatch or ciphertext tampering. Fatal for the record involved.
    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Whether a failed operation should be re-attempted with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts and connection resets are retryable; everything else is not.
        if err.is_timeout() || err.is_connect() {
            AppError::Transient(anyhow::Error::new(err))
        } else {
            AppError::InternalError(anyhow::Error::new(err))
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(err.to_string()),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::Unauthorized(err) => (StatusCode::UNAUTHORIZED, err.to_string(), None),
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::AuthExpired(msg) => (
                StatusCode::CONFLICT,
                "Connection requires relink".to_string(),
                Some(msg),
            ),
            AppError::Transient(err) => (
                StatusCode::BAD_GATEWAY,
                "Upstream temporarily unavailable".to_string(),
                Some(err.to_string()),
            ),
            AppError::CryptoError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Crypto error".to_string(),
                Some(msg),
            ),
            AppError::TemplateError(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Template error".to_string(),
                Some(msg),
            ),
            AppError::InvalidRange(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid date range".to_string(),
                Some(msg),
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(err.to_string()),
            ),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}
