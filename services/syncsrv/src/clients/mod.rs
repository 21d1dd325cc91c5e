//! Client capability sets for the two synchronized systems
//!
//! The engine only sees these traits. Implementations:
//! - `OdooClient`: the ERP, source of truth for products, receiver of orders
//! - `MagentoClient`: the storefront, receiver of products, origin of orders
//! - in-memory fakes in the integration tests

pub mod magento;
pub mod odoo;

pub use magento::MagentoClient;
pub use odoo::OdooClient;

use crate::error::{Result, SyncError};
use crate::model::{
    MappedProductUpdate, OrderRecord, ProductRecord, SourceOrderDraft, TargetProductState,
};
use async_trait::async_trait;
use reqwest::StatusCode;

/// Source system (ERP): product master data and sales orders
#[async_trait]
pub trait SourceSystemClient: Send + Sync + 'static {
    /// Read one product by SKU. Absent SKU is `NotFound`.
    async fn get_product(&self, sku: &str) -> Result<ProductRecord>;

    /// Enumerate every product SKU known to the source
    async fn list_product_skus(&self) -> Result<Vec<String>>;

    /// Create a sales order and return the source's reference for it
    async fn create_order(&self, draft: &SourceOrderDraft) -> Result<String>;

    /// Whether an order referencing this target order id already exists
    async fn has_order_with_external_ref(&self, order_id: &str) -> Result<bool>;

    /// Reachability check
    async fn ping(&self) -> Result<()>;
}

/// Target system (storefront): product state and incoming orders
#[async_trait]
pub trait TargetSystemClient: Send + Sync + 'static {
    async fn get_product_state(&self, sku: &str) -> Result<TargetProductState>;

    async fn update_product(&self, sku: &str, update: &MappedProductUpdate) -> Result<()>;

    /// Read one order by id. Absent order is `NotFound`.
    async fn get_order(&self, order_id: &str) -> Result<OrderRecord>;

    /// Orders not yet carrying the import marker
    async fn list_new_orders(&self) -> Result<Vec<OrderRecord>>;

    async fn mark_order_imported(&self, order_id: &str) -> Result<()>;

    /// Reachability check
    async fn ping(&self) -> Result<()>;
}

// ============================================================================
// HTTP failure classification shared by both clients
// ============================================================================

/// Which side of the bridge a request went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Source,
    Target,
}

impl Side {
    pub(crate) fn unavailable(self, msg: impl Into<String>) -> SyncError {
        match self {
            Self::Source => SyncError::SourceUnavailable(msg.into()),
            Self::Target => SyncError::TargetUnavailable(msg.into()),
        }
    }
}

const MAX_BODY_IN_ERROR: usize = 200;

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_IN_ERROR) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Classify a non-success HTTP status
pub(crate) fn error_for_status(side: Side, status: StatusCode, context: &str, body: &str) -> SyncError {
    let msg = format!("{}: HTTP {} {}", context, status.as_u16(), truncate(body.trim()));
    match status {
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited(msg),
        StatusCode::NOT_FOUND => SyncError::NotFound(msg),
        StatusCode::REQUEST_TIMEOUT | StatusCode::UNAUTHORIZED => side.unavailable(msg),
        s if s.is_server_error() => side.unavailable(msg),
        _ => SyncError::ValidationRejected(msg),
    }
}

/// Classify a transport-level failure
pub(crate) fn error_for_transport(side: Side, err: &reqwest::Error, context: &str) -> SyncError {
    if err.is_decode() {
        return SyncError::ValidationRejected(format!("{}: unexpected response: {}", context, err));
    }
    if let Some(status) = err.status() {
        return error_for_status(side, status, context, "");
    }
    side.unavailable(format!("{}: {}", context, err))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::SyncErrorKind;

    #[test]
    fn test_status_classification() {
        let kind = |side, code: u16| {
            error_for_status(side, StatusCode::from_u16(code).unwrap(), "GET x", "").kind()
        };

        assert_eq!(kind(Side::Target, 502), SyncErrorKind::TargetUnavailable);
        assert_eq!(kind(Side::Source, 503), SyncErrorKind::SourceUnavailable);
        assert_eq!(kind(Side::Target, 429), SyncErrorKind::RateLimited);
        assert_eq!(kind(Side::Target, 404), SyncErrorKind::NotFound);
        assert_eq!(kind(Side::Target, 400), SyncErrorKind::ValidationRejected);
        assert_eq!(kind(Side::Target, 422), SyncErrorKind::ValidationRejected);
        assert_eq!(kind(Side::Target, 401), SyncErrorKind::TargetUnavailable);
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "x".repeat(1000);
        let err = error_for_status(Side::Target, StatusCode::BAD_REQUEST, "PUT products/A1", &body);
        assert!(err.detail().len() < 300);
        assert!(err.detail().starts_with("PUT products/A1: HTTP 400"));
    }
}
