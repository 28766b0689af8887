//! Error types for StudyForge services
//!
//! Provides the pipeline failure taxonomy with:
//! - Distinct error variants for integrity, credit, lock and provider failures
//! - HTTP status code mapping
//! - Retryability classification
//! - Flat `{ success: false, code, error, ...context }` response bodies

use crate::types::Hash256;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Request errors (1xxx)
    InvalidRequest,
    TooLarge,

    // Upstream input errors (2xxx)
    InputNotFound,
    InputUnreadable,
    StudySetNotFound,

    // Integrity errors (3xxx)
    HashMismatch,
    ResolutionFailed,

    // Credit errors (4xxx)
    InsufficientCredits,

    // Coordination errors (5xxx)
    GenerationInFlight,
    RateLimited,
    LockExpired,

    // Generation errors (6xxx)
    ValidationError,
    ProviderError,

    // Storage & registry errors (7xxx)
    StagingFailed,
    RegistryReadFailed,
    RegistryWriteFailed,
    RaceResolutionFailed,

    // Internal errors (9xxx)
    DatabaseError,
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidRequest => 1001,
            ErrorCode::TooLarge => 1002,

            ErrorCode::InputNotFound => 2001,
            ErrorCode::InputUnreadable => 2002,
            ErrorCode::StudySetNotFound => 2003,

            ErrorCode::HashMismatch => 3001,
            ErrorCode::ResolutionFailed => 3002,

            ErrorCode::InsufficientCredits => 4001,

            ErrorCode::GenerationInFlight => 5001,
            ErrorCode::RateLimited => 5002,
            ErrorCode::LockExpired => 5003,

            ErrorCode::ValidationError => 6001,
            ErrorCode::ProviderError => 6002,

            ErrorCode::StagingFailed => 7001,
            ErrorCode::RegistryReadFailed => 7002,
            ErrorCode::RegistryWriteFailed => 7003,
            ErrorCode::RaceResolutionFailed => 7004,

            ErrorCode::DatabaseError => 9001,
            ErrorCode::InternalError => 9002,
            ErrorCode::ConfigurationError => 9003,
            ErrorCode::SerializationError => 9004,
        }
    }

    /// Wire name, as serialized in response bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::TooLarge => "too_large",
            ErrorCode::InputNotFound => "input_not_found",
            ErrorCode::InputUnreadable => "input_unreadable",
            ErrorCode::StudySetNotFound => "study_set_not_found",
            ErrorCode::HashMismatch => "hash_mismatch",
            ErrorCode::ResolutionFailed => "resolution_failed",
            ErrorCode::InsufficientCredits => "insufficient_credits",
            ErrorCode::GenerationInFlight => "generation_in_flight",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::LockExpired => "lock_expired",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::ProviderError => "provider_error",
            ErrorCode::StagingFailed => "staging_failed",
            ErrorCode::RegistryReadFailed => "registry_read_failed",
            ErrorCode::RegistryWriteFailed => "registry_write_failed",
            ErrorCode::RaceResolutionFailed => "race_resolution_failed",
            ErrorCode::DatabaseError => "database_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::ConfigurationError => "configuration_error",
            ErrorCode::SerializationError => "serialization_error",
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Request errors
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        field: Option<String>,
    },

    #[error("Artifact too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    // Upstream input errors
    #[error("No approved lyrics for {unit_id}; needs upstream approval")]
    InputNotFound { unit_id: Hash256 },

    #[error("Canonical input is unreadable: {message}")]
    InputUnreadable { message: String },

    #[error("No study set published for {unit_key}")]
    StudySetNotFound { unit_key: String },

    // Integrity errors
    #[error("Hash mismatch for {reference}: expected {expected}, got {actual}")]
    HashMismatch {
        reference: String,
        expected: Hash256,
        actual: Hash256,
    },

    #[error("Could not resolve {reference} after {attempts} candidate(s): {message}")]
    ResolutionFailed {
        reference: String,
        attempts: usize,
        last_status: Option<u16>,
        message: String,
    },

    // Credit errors
    #[error("Insufficient credits for {submitter}: {available} available, {required} required")]
    InsufficientCredits {
        submitter: String,
        available: u64,
        required: u64,
    },

    // Coordination errors
    #[error("Generation already in flight for {lock_key}")]
    GenerationInFlight {
        lock_key: String,
        retry_after_secs: u64,
    },

    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    #[error("Generation for {lock_key} did not finish within the {ttl_secs}s lock lifetime")]
    LockExpired { lock_key: String, ttl_secs: u64 },

    // Generation errors
    #[error("Generated study set failed validation ({} issue(s))", issues.len())]
    OutputValidation {
        issues: Vec<String>,
        raw_output: String,
    },

    #[error("Generation provider error: {message}")]
    ProviderError { message: String },

    // Storage & registry errors
    #[error("Staging failed: {message}")]
    StagingFailed { message: String },

    #[error("Registry read failed: {message}")]
    RegistryReadFailed { message: String },

    #[error("Registry write failed: {message}")]
    RegistryWriteFailed { message: String },

    #[error("Registry rejected {unit_key} as already published but no record is visible")]
    RaceResolutionFailed { unit_key: String },

    // Internal errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            AppError::TooLarge { .. } => ErrorCode::TooLarge,
            AppError::InputNotFound { .. } => ErrorCode::InputNotFound,
            AppError::InputUnreadable { .. } => ErrorCode::InputUnreadable,
            AppError::StudySetNotFound { .. } => ErrorCode::StudySetNotFound,
            AppError::HashMismatch { .. } => ErrorCode::HashMismatch,
            AppError::ResolutionFailed { .. } => ErrorCode::ResolutionFailed,
            AppError::InsufficientCredits { .. } => ErrorCode::InsufficientCredits,
            AppError::GenerationInFlight { .. } => ErrorCode::GenerationInFlight,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::LockExpired { .. } => ErrorCode::LockExpired,
            AppError::OutputValidation { .. } => ErrorCode::ValidationError,
            AppError::ProviderError { .. } => ErrorCode::ProviderError,
            AppError::StagingFailed { .. } => ErrorCode::StagingFailed,
            AppError::RegistryReadFailed { .. } => ErrorCode::RegistryReadFailed,
            AppError::RegistryWriteFailed { .. } => ErrorCode::RegistryWriteFailed,
            AppError::RaceResolutionFailed { .. } => ErrorCode::RaceResolutionFailed,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::HttpClient(_) => ErrorCode::InternalError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,

            // 402 Payment Required
            AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,

            // 404 Not Found
            AppError::InputNotFound { .. } |
            AppError::StudySetNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::GenerationInFlight { .. } => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 422 Unprocessable Entity
            AppError::InputUnreadable { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::RaceResolutionFailed { .. } |
            AppError::Database(_) |
            AppError::HttpClient(_) |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::HashMismatch { .. } |
            AppError::ResolutionFailed { .. } |
            AppError::OutputValidation { .. } |
            AppError::ProviderError { .. } |
            AppError::StagingFailed { .. } |
            AppError::RegistryReadFailed { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::RegistryWriteFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::LockExpired { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::GenerationInFlight { .. }
                | AppError::RateLimited { .. }
                | AppError::LockExpired { .. }
                | AppError::ResolutionFailed { .. }
                | AppError::ProviderError { .. }
                | AppError::StagingFailed { .. }
                | AppError::RegistryReadFailed { .. }
                | AppError::RegistryWriteFailed { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Variant-specific context merged into the response body
    pub fn context(&self) -> Map<String, Value> {
        let mut ctx = Map::new();
        match self {
            AppError::InvalidRequest { field: Some(field), .. } => {
                ctx.insert("field".into(), json!(field));
            }
            AppError::TooLarge { size, limit } => {
                ctx.insert("size".into(), json!(size));
                ctx.insert("limit".into(), json!(limit));
            }
            AppError::InputNotFound { unit_id } => {
                ctx.insert("unitId".into(), json!(unit_id));
                ctx.insert("needsUpstreamApproval".into(), json!(true));
            }
            AppError::HashMismatch { reference, expected, actual } => {
                ctx.insert("ref".into(), json!(reference));
                ctx.insert("expectedHash".into(), json!(expected));
                ctx.insert("actualHash".into(), json!(actual));
            }
            AppError::ResolutionFailed { reference, attempts, last_status, .. } => {
                ctx.insert("ref".into(), json!(reference));
                ctx.insert("attempts".into(), json!(attempts));
                ctx.insert("lastStatus".into(), json!(last_status));
            }
            AppError::InsufficientCredits { submitter, available, required } => {
                ctx.insert("submitter".into(), json!(submitter));
                ctx.insert("availableCredits".into(), json!(available));
                ctx.insert("requiredCredits".into(), json!(required));
            }
            AppError::GenerationInFlight { retry_after_secs, .. } => {
                ctx.insert("retryAfterSeconds".into(), json!(retry_after_secs));
            }
            AppError::LockExpired { ttl_secs, .. } => {
                ctx.insert("lockTtlSeconds".into(), json!(ttl_secs));
            }
            AppError::OutputValidation { issues, raw_output } => {
                ctx.insert("issues".into(), json!(issues));
                ctx.insert("rawOutput".into(), json!(raw_output));
            }
            _ => {}
        }
        ctx
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: ErrorCode,
    pub error: String,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self {
            success: false,
            code: err.code(),
            error: err.to_string(),
            context: err.context(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = code.as_str(),
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = code.as_str(),
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse::from(&self);
        let mut response = (status, Json(body)).into_response();

        if let AppError::GenerationInFlight { retry_after_secs, .. } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
