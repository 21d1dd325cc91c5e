//! Unified error handling for the bridge services
//!
//! Provides the shared error vocabulary: a platform-wide error enum for
//! process-level failures and a capability trait that every service error
//! type implements so logging, alerting and exit codes stay uniform.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// BridgeError - Main error type
// ============================================================================

/// Main error type for process-level failures
#[derive(Debug, Error)]
pub enum BridgeError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Communication Errors
    // ======================================
    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    // ======================================
    // Request & Data Errors
    // ======================================
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {resource} already exists")]
    Conflict { resource: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Mapping failed: {0}")]
    Mapping(String),

    // ======================================
    // External Service Errors
    // ======================================
    #[error("External service error: {service}: {message}")]
    ExternalService { service: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // ======================================
    // File & Serialization Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Catch-all
    // ======================================
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;

// Conversion traits for common error types
impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[macro_export]
macro_rules! invalid_config {
    ($field:expr, $reason:expr) => {
        $crate::BridgeError::InvalidConfig {
            field: $field.to_string(),
            reason: $reason.to_string(),
        }
    };
}

// ============================================================================
// BridgeError implements BridgeErrorTrait
// ============================================================================

impl BridgeErrorTrait for BridgeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",

            Self::Timeout(_) => "TIMEOUT",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",

            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Mapping(_) => "MAPPING_ERROR",

            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::HttpClient(_) => "HTTP_CLIENT_ERROR",

            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",

            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } => ErrorCategory::Configuration,

            Self::HttpClient(_) | Self::ExternalService { .. } => ErrorCategory::Network,

            Self::Timeout(_) => ErrorCategory::Timeout,

            Self::RateLimitExceeded => ErrorCategory::ResourceExhausted,

            Self::Validation(_) => ErrorCategory::Validation,

            Self::Mapping(_) => ErrorCategory::Mapping,

            Self::NotFound { .. } => ErrorCategory::NotFound,

            Self::Conflict { .. } => ErrorCategory::Conflict,

            Self::Io(_) | Self::Serialization(_) => ErrorCategory::Internal,

            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Bridge Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Network,
    Timeout,

    // Business logic layer
    Validation,
    Mapping,
    NotFound,
    Conflict,

    // System level
    Internal,
    ResourceExhausted,

    // Others
    Unknown,
}

/// Bridge error capability trait
///
/// Defines a unified interface that every service error type implements.
/// Each service keeps its own domain-specific error type (e.g. the sync
/// engine's `SyncError`) and gains the common interface through this trait.
pub trait BridgeErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs, alerts and CLI output)
    fn error_code(&self) -> &'static str;

    /// Get error category (for classification)
    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::ResourceExhausted
        )
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Mapping => Level::ERROR,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::ResourceExhausted => {
                Level::WARN
            },
            ErrorCategory::Validation | ErrorCategory::NotFound => Level::INFO,
            _ => Level::WARN,
        }
    }

    /// Whether an operator alert should be triggered
    fn should_alert(&self) -> bool {
        !self.is_retryable()
    }
}
