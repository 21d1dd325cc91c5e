//! Error handling for the synchronization service
//!
//! Every failure a sync attempt can hit is classified into one of eight
//! kinds. Three are transient and may be retried; the rest are terminal.

use errors::{BridgeError, BridgeErrorTrait, ErrorCategory};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a sync failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    SourceUnavailable,
    TargetUnavailable,
    RateLimited,
    NotFound,
    MappingError,
    ValidationRejected,
    Timeout,
    DuplicateOrder,
}

impl SyncErrorKind {
    /// Transient kinds are the only ones a retry policy may ever retry
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable | Self::TargetUnavailable | Self::RateLimited
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceUnavailable => "source_unavailable",
            Self::TargetUnavailable => "target_unavailable",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::MappingError => "mapping_error",
            Self::ValidationRejected => "validation_rejected",
            Self::Timeout => "timeout",
            Self::DuplicateOrder => "duplicate_order",
        }
    }
}

impl std::fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync Service Error Type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Source (ERP) unreachable, 5xx or connection timeout
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Target (storefront) unreachable, 5xx or connection timeout
    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    /// Either side throttled the request
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Entity key absent on the side that was asked
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record cannot be translated (missing or invalid fields)
    #[error("Mapping error: {0}")]
    MappingError(String),

    /// Write refused by the receiving side for data reasons
    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    /// Whole unit exceeded its lease timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Source already holds an order with this external reference
    #[error("Duplicate order: {0}")]
    DuplicateOrder(String),
}

/// Result type alias for the sync service
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            Self::SourceUnavailable(_) => SyncErrorKind::SourceUnavailable,
            Self::TargetUnavailable(_) => SyncErrorKind::TargetUnavailable,
            Self::RateLimited(_) => SyncErrorKind::RateLimited,
            Self::NotFound(_) => SyncErrorKind::NotFound,
            Self::MappingError(_) => SyncErrorKind::MappingError,
            Self::ValidationRejected(_) => SyncErrorKind::ValidationRejected,
            Self::Timeout(_) => SyncErrorKind::Timeout,
            Self::DuplicateOrder(_) => SyncErrorKind::DuplicateOrder,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// Detail message without the kind prefix
    pub fn detail(&self) -> &str {
        match self {
            Self::SourceUnavailable(msg)
            | Self::TargetUnavailable(msg)
            | Self::RateLimited(msg)
            | Self::NotFound(msg)
            | Self::MappingError(msg)
            | Self::ValidationRejected(msg)
            | Self::Timeout(msg)
            | Self::DuplicateOrder(msg) => msg,
        }
    }

    pub fn from_kind(kind: SyncErrorKind, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match kind {
            SyncErrorKind::SourceUnavailable => Self::SourceUnavailable(msg),
            SyncErrorKind::TargetUnavailable => Self::TargetUnavailable(msg),
            SyncErrorKind::RateLimited => Self::RateLimited(msg),
            SyncErrorKind::NotFound => Self::NotFound(msg),
            SyncErrorKind::MappingError => Self::MappingError(msg),
            SyncErrorKind::ValidationRejected => Self::ValidationRejected(msg),
            SyncErrorKind::Timeout => Self::Timeout(msg),
            SyncErrorKind::DuplicateOrder => Self::DuplicateOrder(msg),
        }
    }

    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::MappingError(msg.into())
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::ValidationRejected(msg.into())
    }
}

// ============================================================================
// Conversion from SyncError to BridgeError for process boundaries
// ============================================================================

impl From<SyncError> for BridgeError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::SourceUnavailable(msg) => BridgeError::ExternalService {
                service: "odoo".to_string(),
                message: msg,
            },
            SyncError::TargetUnavailable(msg) => BridgeError::ExternalService {
                service: "magento".to_string(),
                message: msg,
            },
            SyncError::RateLimited(_) => BridgeError::RateLimitExceeded,
            SyncError::NotFound(msg) => BridgeError::NotFound { resource: msg },
            SyncError::MappingError(msg) => BridgeError::Mapping(msg),
            SyncError::ValidationRejected(msg) => BridgeError::Validation(msg),
            SyncError::Timeout(msg) => BridgeError::Timeout(msg),
            SyncError::DuplicateOrder(msg) => BridgeError::Conflict { resource: msg },
        }
    }
}

// ============================================================================
// SyncError implements BridgeErrorTrait
// ============================================================================

impl BridgeErrorTrait for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "SYNC_SOURCE_UNAVAILABLE",
            Self::TargetUnavailable(_) => "SYNC_TARGET_UNAVAILABLE",
            Self::RateLimited(_) => "SYNC_RATE_LIMITED",
            Self::NotFound(_) => "SYNC_NOT_FOUND",
            Self::MappingError(_) => "SYNC_MAPPING_ERROR",
            Self::ValidationRejected(_) => "SYNC_VALIDATION_REJECTED",
            Self::Timeout(_) => "SYNC_TIMEOUT",
            Self::DuplicateOrder(_) => "SYNC_DUPLICATE_ORDER",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::SourceUnavailable(_) | Self::TargetUnavailable(_) => ErrorCategory::Network,
            Self::RateLimited(_) => ErrorCategory::ResourceExhausted,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::MappingError(_) => ErrorCategory::Mapping,
            Self::ValidationRejected(_) => ErrorCategory::Validation,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::DuplicateOrder(_) => ErrorCategory::Conflict,
        }
    }

    // A unit timeout is terminal even though its category is retryable elsewhere
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(SyncError::SourceUnavailable("down".into()).is_transient());
        assert!(SyncError::TargetUnavailable("502".into()).is_transient());
        assert!(SyncError::RateLimited("429".into()).is_transient());

        assert!(!SyncError::NotFound("A1".into()).is_transient());
        assert!(!SyncError::MappingError("no sku".into()).is_transient());
        assert!(!SyncError::ValidationRejected("bad".into()).is_transient());
        assert!(!SyncError::Timeout("300s".into()).is_transient());
        assert!(!SyncError::DuplicateOrder("100".into()).is_transient());
    }

    #[test]
    fn test_trait_classification() {
        let err = SyncError::Timeout("lease expired".into());
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(!err.is_retryable());
        assert!(err.should_alert());

        let err = SyncError::RateLimited("slow down".into());
        assert!(err.is_retryable());
        assert!(!err.should_alert());
        assert_eq!(err.error_code(), "SYNC_RATE_LIMITED");
    }

    #[test]
    fn test_kind_serde_names() {
        let json = serde_json::to_string(&SyncErrorKind::ValidationRejected).unwrap();
        assert_eq!(json, "\"validation_rejected\"");
        let kind: SyncErrorKind = serde_json::from_str("\"rate_limited\"").unwrap();
        assert_eq!(kind, SyncErrorKind::RateLimited);
        assert_eq!(SyncErrorKind::DuplicateOrder.to_string(), "duplicate_order");
    }

    #[test]
    fn test_into_bridge_error() {
        let bridge: BridgeError = SyncError::NotFound("product A1".into()).into();
        assert_eq!(bridge.error_code(), "NOT_FOUND");

        let bridge: BridgeError = SyncError::DuplicateOrder("order 100".into()).into();
        assert_eq!(bridge.error_code(), "CONFLICT");
        assert_eq!(bridge.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_from_kind_round_trips() {
        let err = SyncError::from_kind(SyncErrorKind::DuplicateOrder, "order 100");
        assert_eq!(err.kind(), SyncErrorKind::DuplicateOrder);
        assert_eq!(err.detail(), "order 100");
    }

    #[test]
    fn test_detail_strips_prefix() {
        let err = SyncError::mapping("retail price is negative");
        assert_eq!(err.detail(), "retail price is negative");
        assert_eq!(err.to_string(), "Mapping error: retail price is negative");
    }
}
