//! Common error types for the image generation gateway

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[{backend}] invalid input: {message}")]
    InvalidInput { backend: String, message: String },

    #[error("[{backend}] not configured: {message}")]
    NotConfigured { backend: String, message: String },

    #[error("[{backend}] {operation} is not implemented by this backend")]
    NotImplemented { backend: String, operation: String },

    #[error("[{backend}] capability exceeded: {message}")]
    CapabilityExceeded { backend: String, message: String },

    #[error("[{backend}] rate limit exceeded, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { backend: String, retry_after: Duration },

    #[error("[{backend}] transient failure: {message}")]
    Transient { backend: String, message: String },

    #[error("[{backend}] exhausted: {message}")]
    Exhausted { backend: String, message: String },

    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    #[error("No configured backends available: {0}")]
    NoBackendsAvailable(String),

    #[error("{source} (tried: {})", tried.join(" -> "))]
    Dispatch {
        tried: Vec<String>,
        #[source]
        source: Box<AppError>,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_input(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn not_configured(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotConfigured {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn not_implemented(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotImplemented {
            backend: backend.into(),
            operation: operation.into(),
        }
    }

    pub fn capability_exceeded(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CapabilityExceeded {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn transient(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn exhausted(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exhausted {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether repeating the call (possibly on another backend) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Transient { .. } | AppError::RateLimited { .. } => true,
            AppError::Dispatch { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Name of the backend the error originated from, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            AppError::InvalidInput { backend, .. }
            | AppError::NotConfigured { backend, .. }
            | AppError::NotImplemented { backend, .. }
            | AppError::CapabilityExceeded { backend, .. }
            | AppError::RateLimited { backend, .. }
            | AppError::Transient { backend, .. }
            | AppError::Exhausted { backend, .. } => Some(backend),
            AppError::Dispatch { source, .. } => source.backend(),
            _ => None,
        }
    }

    /// Annotate an error with the backends that were attempted.
    pub fn with_tried(self, tried: Vec<String>) -> Self {
        match self {
            AppError::Dispatch { source, .. } => AppError::Dispatch { tried, source },
            other => AppError::Dispatch {
                tried,
                source: Box::new(other),
            },
        }
    }

    fn status_parts(&self) -> (StatusCode, &'static str, Option<&'static str>) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            AppError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_input")),
            AppError::NotConfigured { .. } => (StatusCode::SERVICE_UNAVAILABLE, "backend_error", Some("not_configured")),
            AppError::NotImplemented { .. } => (StatusCode::NOT_IMPLEMENTED, "backend_error", Some("not_implemented")),
            AppError::CapabilityExceeded { .. } => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("capability_exceeded")),
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error", Some("rate_limit_exceeded")),
            AppError::Transient { .. } => (StatusCode::BAD_GATEWAY, "backend_error", Some("transient")),
            AppError::Exhausted { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", Some("exhausted")),
            AppError::BackendNotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("backend_not_found")),
            AppError::NoBackendsAvailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("no_backends_available")),
            AppError::Dispatch { source, .. } => source.status_parts(),
            AppError::AuthenticationFailed(_) => (StatusCode::UNAUTHORIZED, "authentication_error", Some("invalid_api_key")),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::RateLimited { retry_after, .. } => Some(*retry_after),
            AppError::Dispatch { source, .. } => source.retry_after(),
            _ => None,
        }
    }
}

/// Error response format (OpenAI compatible)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = self.status_parts();
        let retry_after = self.retry_after();

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
                backend: self.backend().map(str::to_string),
            },
        });

        let mut response = (status, body).into_response();
        if let Some(wait) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&wait.as_secs().max(1).to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
