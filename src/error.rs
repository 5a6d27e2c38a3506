//! Error types for actloop
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

/// All error types that can occur in actloop
#[derive(Debug, Error)]
pub enum ActloopError {
    /// Configuration could not be loaded or is inconsistent
    #[error("Config error: {0}")]
    Config(String),

    /// Provider/model could not be resolved before a run
    #[error("Model resolution failed: {0}")]
    ModelResolution(String),

    /// Model provider capability failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Device or browser operator failed
    #[error(transparent)]
    Operator(#[from] OperatorError),

    /// Tool registration or execution error
    #[error("Tool error: {0}")]
    Tool(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for actloop operations
pub type Result<T> = std::result::Result<T, ActloopError>;

/// Errors raised by a model provider capability
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Provider script exhausted")]
    Exhausted,

    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            ProviderError::Network(_) => true,
            ProviderError::InvalidResponse(_) => false,
            ProviderError::Stream(_) => true,
            ProviderError::Exhausted => false,
            ProviderError::Cancelled => false,
        }
    }
}

/// Errors raised by an operator while capturing or acting on a device
#[derive(Debug, Clone, Error)]
pub enum OperatorError {
    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),
}
