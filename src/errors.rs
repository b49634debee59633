use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(#[source] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("External service error: {0}")]
    ExternalService(#[source] anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("An unexpected error occurred: {0}")]
    Unexpected(#[from] anyhow::Error),

    #[error("Validation errors")]
    ValidationErrors(HashMap<String, Vec<String>>),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, errors) = match &self {
            AppError::Authentication(e) => (StatusCode::UNAUTHORIZED, format!("{}", e), None),
            AppError::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {}", e),
                None,
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::ExternalService(e) => (
                StatusCode::BAD_GATEWAY,
                format!("External service error: {}", e),
                None,
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::UrlParse(e) => (StatusCode::BAD_REQUEST, format!("Invalid URL: {}", e), None),
            AppError::Timeout(e) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("Operation timed out: {}", e),
                None,
            ),
            AppError::Unexpected(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An unexpected error occurred: {}", e),
                None,
            ),
            AppError::ValidationErrors(validation_errors) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                Some(validation_errors.clone()),
            ),
        };

        tracing::error!(
            error_type = %self,
            error_message = %error_message,
            status_code = %status,
            "Request error"
        );

        let body = match errors {
            Some(validation_errors) => Json(json!({
                "message": error_message,
                "status": status.as_u16(),
                "errors": validation_errors
            })),
            None => Json(json!({
                "message": error_message,
                "status": status.as_u16()
            })),
        };
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Database record not found".to_string()),
            _ => AppError::Database(anyhow::Error::new(err).context("SQLx operation failed")),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let error_type = match &err {
            e if e.is_timeout() => "Request Timeout",
            e if e.is_connect() => "Connection Failed",
            e if e.is_decode() => "Response Decode Failed",
            _ => "Unknown HTTP Error",
        };

        tracing::error!(
            error = %err,
            url = ?err.url(),
            status = ?err.status(),
            is_timeout = err.is_timeout(),
            is_connect = err.is_connect(),
            "HTTP request failed"
        );

        let context = match err.status() {
            Some(status) => format!(
                "External HTTP request failed - HTTP {}, Type: {}",
                status.as_u16(),
                error_type
            ),
            None => format!("External HTTP request failed - Type: {}", error_type),
        };

        AppError::ExternalService(anyhow::Error::new(err).context(context))
    }
}
