//! Single-entity sync attempts
//!
//! Two directional pipelines with different idempotence strategies:
//! - products flow source -> target and compare before writing
//! - orders flow target -> source and are created once, guarded by a
//!   reference check on the source
//!
//! Each call here is one attempt. Retries, leases and timeouts are layered
//! on top by the engine.

use crate::clients::{SourceSystemClient, TargetSystemClient};
use crate::error::Result;
use crate::mapper;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a successful attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitResult {
    /// A write was performed
    Changed,
    /// Target already matched or the order already exists
    Unchanged,
}

/// Product pipeline: source read, map, target compare, target write
#[derive(Clone)]
pub struct ProductPipeline {
    source: Arc<dyn SourceSystemClient>,
    target: Arc<dyn TargetSystemClient>,
}

impl ProductPipeline {
    pub fn new(source: Arc<dyn SourceSystemClient>, target: Arc<dyn TargetSystemClient>) -> Self {
        Self { source, target }
    }

    pub async fn attempt(&self, sku: &str) -> Result<UnitResult> {
        let record = self.source.get_product(sku).await?;
        let update = mapper::map_product(&record)?;

        let state = self.target.get_product_state(sku).await?;
        if update.matches(&state) {
            debug!("Product {} unchanged on target", sku);
            return Ok(UnitResult::Unchanged);
        }

        self.target.update_product(sku, &update).await?;
        info!(
            "Product {} synced: price {} -> {}, qty {} -> {}",
            sku, state.price, update.target_price, state.quantity, update.target_quantity
        );
        Ok(UnitResult::Changed)
    }
}

/// Order pipeline: reference check, target read, map, source create, mark
#[derive(Clone)]
pub struct OrderPipeline {
    source: Arc<dyn SourceSystemClient>,
    target: Arc<dyn TargetSystemClient>,
}

impl OrderPipeline {
    pub fn new(source: Arc<dyn SourceSystemClient>, target: Arc<dyn TargetSystemClient>) -> Self {
        Self { source, target }
    }

    pub async fn attempt(&self, order_id: &str) -> Result<UnitResult> {
        if self.source.has_order_with_external_ref(order_id).await? {
            debug!("Order {} already in source", order_id);
            // Heals an earlier run that created the order but failed to mark it
            self.mark_imported(order_id).await;
            return Ok(UnitResult::Unchanged);
        }

        let order = self.target.get_order(order_id).await?;
        let draft = mapper::map_order(&order)?;
        let source_ref = self.source.create_order(&draft).await?;
        info!("Order {} imported as {}", order_id, source_ref);

        self.mark_imported(order_id).await;
        Ok(UnitResult::Changed)
    }

    async fn mark_imported(&self, order_id: &str) {
        if let Err(e) = self.target.mark_order_imported(order_id).await {
            warn!("Order {}: import marker not set: {}", order_id, e);
        }
    }
}
