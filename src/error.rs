//! Error types for careroute
//!
//! `AppError` is the application-level error and implements `IntoResponse` for
//! Axum handlers. `ProviderError` describes why a single provider attempt did
//! not produce an answer; it never reaches the caller directly because the
//! fallback orchestrator resolves every variant by advancing the chain.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    /// Empty or otherwise unusable query text. Rejected before classification.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("State persistence failed for {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            Self::Persistence { .. } => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

/// Outcome of a failed provider attempt
///
/// Quota and rate-limit variants are recoverable by moving to the next
/// candidate. Timeouts and transport failures are transient and get exactly
/// one immediate retry before the candidate is abandoned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider {provider} reported its quota as exceeded")]
    QuotaExceeded { provider: String },

    #[error("Provider {provider} is rate limited")]
    RateLimited { provider: String },

    #[error("Request to {provider} timed out after {timeout_seconds} seconds")]
    Timeout {
        provider: String,
        timeout_seconds: u64,
    },

    #[error("Transport failure talking to {provider}: {reason}")]
    Transport { provider: String, reason: String },

    #[error("Provider {provider} returned an unusable response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} has no answer for this query")]
    NoMatch { provider: String },
}

impl ProviderError {
    /// Whether the failure warrants one immediate retry on the same provider
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }

    /// Metrics label for this failure
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::NoMatch { .. } => "no_match",
        }
    }

    /// Name of the provider the failure came from
    pub fn provider(&self) -> &str {
        match self {
            Self::QuotaExceeded { provider }
            | Self::RateLimited { provider }
            | Self::Timeout { provider, .. }
            | Self::Transport { provider, .. }
            | Self::InvalidResponse { provider, .. }
            | Self::NoMatch { provider } => provider,
        }
    }
}
