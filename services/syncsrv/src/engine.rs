//! Synchronization engine
//!
//! Entry point for every trigger. A single-entity sync goes
//! guard -> timeout -> retry -> pipeline attempt; bulk runs enumerate keys
//! and feed them through the same path. Terminal failures are handed to the
//! notifier on a detached task so delivery never delays the outcome.

use crate::clients::{SourceSystemClient, TargetSystemClient};
use crate::error::{Result, SyncError, SyncErrorKind};
use crate::guard::ConcurrencyGuard;
use crate::model::{
    BatchReport, ComponentHealth, Direction, HealthReport, SyncOutcome, SyncStatus,
};
use crate::notifier::{self, LogNotifier, Notifier};
use crate::orchestrator;
use crate::retry::RetryPolicy;
use crate::unit::{OrderPipeline, ProductPipeline, UnitResult};
use errors::BridgeErrorTrait;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Lease-table key; products and orders live in separate key spaces
pub fn lease_key(direction: Direction, entity_key: &str) -> String {
    format!("{}:{}", direction, entity_key)
}

/// Synchronization engine shared by manual triggers, bulk runs and jobs
pub struct SyncEngine {
    source: Arc<dyn SourceSystemClient>,
    target: Arc<dyn TargetSystemClient>,
    products: ProductPipeline,
    orders: OrderPipeline,
    guard: ConcurrencyGuard,
    retry: RetryPolicy,
    notifier: Arc<dyn Notifier>,
    parallelism: usize,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn SourceSystemClient>, target: Arc<dyn TargetSystemClient>) -> Self {
        Self {
            products: ProductPipeline::new(source.clone(), target.clone()),
            orders: OrderPipeline::new(source.clone(), target.clone()),
            source,
            target,
            guard: ConcurrencyGuard::new(DEFAULT_LEASE_TIMEOUT),
            retry: RetryPolicy::default(),
            notifier: Arc::new(LogNotifier),
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    pub fn with_guard(mut self, guard: ConcurrencyGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    // ========================================================================
    // Single-entity triggers
    // ========================================================================

    /// Sync one product from source to target
    pub async fn sync_product(&self, sku: &str) -> SyncOutcome {
        self.run_guarded(sku, Direction::Product, |_| self.products.attempt(sku))
            .await
    }

    /// Import one order from target into source
    pub async fn sync_order(&self, order_id: &str) -> SyncOutcome {
        self.run_guarded(order_id, Direction::Order, |_| self.orders.attempt(order_id))
            .await
    }

    async fn run_guarded<F, Fut>(&self, key: &str, direction: Direction, op: F) -> SyncOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<UnitResult>>,
    {
        let lease = match self.guard.acquire(&lease_key(direction, key)) {
            Ok(lease) => lease,
            Err(rejected) => {
                debug!("Skipping {} {}: {}", direction, key, rejected);
                return SyncOutcome::skipped_in_progress(key, direction);
            },
        };

        // Attempt counter survives the run being dropped by the timeout
        let attempts = AtomicU32::new(0);
        let mut op = op;
        let counted = |attempt: u32| {
            attempts.store(attempt, Ordering::Relaxed);
            op(attempt)
        };

        let timeout = self.guard.lease_timeout();
        let outcome = match tokio::time::timeout(timeout, self.retry.run(key, direction, counted))
            .await
        {
            Ok(run) => run.outcome,
            Err(_) => {
                let err = SyncError::Timeout(format!(
                    "{} {} exceeded lease timeout of {:?}",
                    direction, key, timeout
                ));
                SyncOutcome::terminal_failure(
                    key,
                    direction,
                    attempts.load(Ordering::Relaxed),
                    SyncErrorKind::Timeout,
                    err.detail(),
                )
            },
        };
        drop(lease);

        self.report(&outcome);
        outcome
    }

    fn report(&self, outcome: &SyncOutcome) {
        if outcome.status != SyncStatus::TerminalFailure {
            debug!(
                entity = %outcome.entity_key,
                direction = %outcome.direction,
                attempts = outcome.attempt_count,
                "Sync finished: {:?}",
                outcome.status
            );
            return;
        }

        let detail = outcome.error_detail.as_deref().unwrap_or("");
        match outcome_log_level(outcome) {
            Level::ERROR => error!(
                entity = %outcome.entity_key,
                direction = %outcome.direction,
                attempts = outcome.attempt_count,
                "Sync failed: {}",
                detail
            ),
            Level::WARN => warn!(
                entity = %outcome.entity_key,
                direction = %outcome.direction,
                attempts = outcome.attempt_count,
                "Sync failed: {}",
                detail
            ),
            _ => info!(
                entity = %outcome.entity_key,
                direction = %outcome.direction,
                attempts = outcome.attempt_count,
                "Sync failed: {}",
                detail
            ),
        }
        let notifier = Arc::clone(&self.notifier);
        let outcome = outcome.clone();
        tokio::spawn(async move {
            notifier::notify_best_effort(notifier.as_ref(), &outcome).await;
        });
    }

    // ========================================================================
    // Bulk triggers
    // ========================================================================

    /// Sync every product the source lists
    ///
    /// Fails only when the product list cannot be read.
    pub async fn sync_all_products(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        let (_, skus) = self
            .retry
            .execute(
                "product enumeration",
                |_| self.source.list_product_skus(),
                |_, _| {},
            )
            .await;
        let skus = skus?;

        Ok(orchestrator::run_batch(
            Direction::Product,
            skus,
            self.parallelism,
            cancel,
            |sku| async move { self.sync_product(&sku).await },
        )
        .await)
    }

    /// Import every order the target reports as not yet imported
    ///
    /// Fails only when the order list cannot be read.
    pub async fn sync_all_new_orders(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        let (_, orders) = self
            .retry
            .execute("order enumeration", |_| self.target.list_new_orders(), |_, _| {})
            .await;
        let order_ids = orders?.into_iter().map(|order| order.order_id).collect();

        Ok(orchestrator::run_batch(
            Direction::Order,
            order_ids,
            self.parallelism,
            cancel,
            |order_id| async move { self.sync_order(&order_id).await },
        )
        .await)
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Probe both systems concurrently
    pub async fn health(&self) -> HealthReport {
        let (source, target) = tokio::join!(self.source.ping(), self.target.ping());
        let report = HealthReport::new(
            ComponentHealth::from_result(&source),
            ComponentHealth::from_result(&target),
            self.guard.active_leases(),
        );
        info!(
            "Health: {:?} (source reachable={}, target reachable={})",
            report.status, report.source.reachable, report.target.reachable
        );
        report
    }
}

/// Log level for a terminal outcome, taken from the error classification
fn outcome_log_level(outcome: &SyncOutcome) -> Level {
    match outcome.error_kind {
        Some(kind) => {
            SyncError::from_kind(kind, outcome.error_detail.clone().unwrap_or_default()).log_level()
        },
        None => Level::ERROR,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_lease_keys_are_namespaced() {
        assert_eq!(lease_key(Direction::Product, "100"), "product:100");
        assert_eq!(lease_key(Direction::Order, "100"), "order:100");
    }

    #[test]
    fn test_outcome_log_level_follows_classification() {
        let outcome = |kind| {
            SyncOutcome::terminal_failure("A1", Direction::Product, 1, kind, "detail")
        };
        assert_eq!(
            outcome_log_level(&outcome(SyncErrorKind::MappingError)),
            Level::ERROR
        );
        assert_eq!(
            outcome_log_level(&outcome(SyncErrorKind::TargetUnavailable)),
            Level::WARN
        );
        assert_eq!(
            outcome_log_level(&outcome(SyncErrorKind::NotFound)),
            Level::INFO
        );
    }
}
