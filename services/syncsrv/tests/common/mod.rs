//! In-memory source/target systems for engine tests
//!
//! Each fake can be scripted to fail a number of times, fail permanently
//! for a key, or stall, and counts the calls it receives.

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use syncsrv::clients::{SourceSystemClient, TargetSystemClient};
use syncsrv::model::{
    CustomerRef, MappedProductUpdate, OrderLine, OrderRecord, ProductRecord, SourceOrderDraft,
    SyncOutcome, TargetProductState,
};
use syncsrv::notifier::{Notifier, NotifyError};
use syncsrv::{ConcurrencyGuard, RetryPolicy, Result, SyncEngine, SyncError};

// ============================================================================
// Fixtures
// ============================================================================

pub fn product(sku: &str, quantity: f64, retail_price: f64, promo_price: Option<f64>) -> ProductRecord {
    ProductRecord {
        sku: sku.to_string(),
        quantity,
        retail_price,
        promo_price,
    }
}

pub fn order(order_id: &str, skus: &[&str]) -> OrderRecord {
    OrderRecord {
        order_id: order_id.to_string(),
        line_items: skus
            .iter()
            .map(|sku| OrderLine {
                sku: sku.to_string(),
                qty: 1.0,
                unit_price: 25.0,
            })
            .collect(),
        customer_ref: CustomerRef {
            email: "jane@example.com".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            city: Some("Lyon".to_string()),
            country_code: Some("fr".to_string()),
            ..Default::default()
        },
        currency: "EUR".to_string(),
        placed_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()),
    }
}

/// Retries fast and deterministically
pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_jitter(false)
}

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub target: Arc<FakeTarget>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<SyncEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(quick_retry(3), ConcurrencyGuard::new(Duration::from_secs(300)), 4)
    }

    pub fn with(retry: RetryPolicy, guard: ConcurrencyGuard, parallelism: usize) -> Self {
        let source = Arc::new(FakeSource::default());
        let target = Arc::new(FakeTarget::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = SyncEngine::new(source.clone(), target.clone())
            .with_guard(guard)
            .with_retry_policy(retry)
            .with_notifier(notifier.clone())
            .with_parallelism(parallelism);
        Self {
            source,
            target,
            notifier,
            engine: Arc::new(engine),
        }
    }
}

fn pop_failure(queue: &Mutex<VecDeque<SyncError>>) -> Result<()> {
    match queue.lock().unwrap().pop_front() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Tracks concurrent calls and the highest concurrency seen
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Source (ERP)
// ============================================================================

#[derive(Default)]
pub struct FakeSource {
    products: Mutex<HashMap<String, ProductRecord>>,
    /// Extra SKUs returned by enumeration without a product behind them
    listed_only: Mutex<Vec<String>>,
    orders: Mutex<HashMap<String, SourceOrderDraft>>,
    get_product_failures: Mutex<VecDeque<SyncError>>,
    create_order_failures: Mutex<VecDeque<SyncError>>,
    list_failure: Mutex<Option<SyncError>>,
    product_delay: Mutex<Duration>,
    get_product_calls: AtomicUsize,
    create_order_calls: AtomicUsize,
    pub in_flight: InFlight,
}

impl FakeSource {
    pub fn put_product(&self, record: ProductRecord) {
        self.products
            .lock()
            .unwrap()
            .insert(record.sku.clone(), record);
    }

    pub fn list_extra_sku(&self, sku: &str) {
        self.listed_only.lock().unwrap().push(sku.to_string());
    }

    pub fn fail_get_product(&self, times: usize, err: SyncError) {
        let mut queue = self.get_product_failures.lock().unwrap();
        queue.extend(std::iter::repeat(err).take(times));
    }

    pub fn fail_create_order(&self, times: usize, err: SyncError) {
        let mut queue = self.create_order_failures.lock().unwrap();
        queue.extend(std::iter::repeat(err).take(times));
    }

    pub fn fail_listing(&self, err: Option<SyncError>) {
        *self.list_failure.lock().unwrap() = err;
    }

    /// Every product read takes this long
    pub fn stall_products(&self, delay: Duration) {
        *self.product_delay.lock().unwrap() = delay;
    }

    pub fn insert_existing_order(&self, external_ref: &str, draft: SourceOrderDraft) {
        self.orders
            .lock()
            .unwrap()
            .insert(external_ref.to_string(), draft);
    }

    pub fn order(&self, external_ref: &str) -> Option<SourceOrderDraft> {
        self.orders.lock().unwrap().get(external_ref).cloned()
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn get_product_calls(&self) -> usize {
        self.get_product_calls.load(Ordering::SeqCst)
    }

    pub fn create_order_calls(&self) -> usize {
        self.create_order_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceSystemClient for FakeSource {
    async fn get_product(&self, sku: &str) -> Result<ProductRecord> {
        self.get_product_calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.enter();
        let delay = *self.product_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.leave();

        pop_failure(&self.get_product_failures)?;
        self.products
            .lock()
            .unwrap()
            .get(sku)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("product {}", sku)))
    }

    async fn list_product_skus(&self) -> Result<Vec<String>> {
        if let Some(err) = self.list_failure.lock().unwrap().clone() {
            return Err(err);
        }
        let mut skus: Vec<String> = self.products.lock().unwrap().keys().cloned().collect();
        skus.sort();
        skus.extend(self.listed_only.lock().unwrap().iter().cloned());
        Ok(skus)
    }

    async fn create_order(&self, draft: &SourceOrderDraft) -> Result<String> {
        self.create_order_calls.fetch_add(1, Ordering::SeqCst);
        pop_failure(&self.create_order_failures)?;

        let mut orders = self.orders.lock().unwrap();
        if orders.contains_key(&draft.external_ref) {
            return Err(SyncError::DuplicateOrder(format!(
                "client_order_ref {} exists",
                draft.external_ref
            )));
        }
        orders.insert(draft.external_ref.clone(), draft.clone());
        Ok(format!("S{:05}", orders.len()))
    }

    async fn has_order_with_external_ref(&self, order_id: &str) -> Result<bool> {
        Ok(self.orders.lock().unwrap().contains_key(order_id))
    }

    async fn ping(&self) -> Result<()> {
        match self.list_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Target (storefront)
// ============================================================================

#[derive(Default)]
pub struct FakeTarget {
    states: Mutex<HashMap<String, TargetProductState>>,
    orders: Mutex<HashMap<String, OrderRecord>>,
    imported: Mutex<HashSet<String>>,
    state_failures: Mutex<VecDeque<SyncError>>,
    update_failures: Mutex<VecDeque<SyncError>>,
    /// SKUs whose writes always fail with this error
    broken_skus: Mutex<HashMap<String, SyncError>>,
    fail_marker: Mutex<bool>,
    list_failure: Mutex<Option<SyncError>>,
    state_calls: AtomicUsize,
    update_calls: AtomicUsize,
    mark_calls: AtomicUsize,
}

impl FakeTarget {
    pub fn put_state(&self, sku: &str, state: TargetProductState) {
        self.states.lock().unwrap().insert(sku.to_string(), state);
    }

    pub fn state(&self, sku: &str) -> Option<TargetProductState> {
        self.states.lock().unwrap().get(sku).cloned()
    }

    pub fn put_order(&self, order: OrderRecord) {
        self.orders
            .lock()
            .unwrap()
            .insert(order.order_id.clone(), order);
    }

    pub fn fail_get_state(&self, times: usize, err: SyncError) {
        let mut queue = self.state_failures.lock().unwrap();
        queue.extend(std::iter::repeat(err).take(times));
    }

    pub fn fail_update(&self, times: usize, err: SyncError) {
        let mut queue = self.update_failures.lock().unwrap();
        queue.extend(std::iter::repeat(err).take(times));
    }

    pub fn break_sku(&self, sku: &str, err: SyncError) {
        self.broken_skus.lock().unwrap().insert(sku.to_string(), err);
    }

    pub fn fail_marker(&self, fail: bool) {
        *self.fail_marker.lock().unwrap() = fail;
    }

    pub fn fail_listing(&self, err: Option<SyncError>) {
        *self.list_failure.lock().unwrap() = err;
    }

    pub fn is_imported(&self, order_id: &str) -> bool {
        self.imported.lock().unwrap().contains(order_id)
    }

    pub fn state_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn mark_calls(&self) -> usize {
        self.mark_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetSystemClient for FakeTarget {
    async fn get_product_state(&self, sku: &str) -> Result<TargetProductState> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        pop_failure(&self.state_failures)?;
        Ok(self.state(sku).unwrap_or_default())
    }

    async fn update_product(&self, sku: &str, update: &MappedProductUpdate) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        pop_failure(&self.update_failures)?;
        if let Some(err) = self.broken_skus.lock().unwrap().get(sku).cloned() {
            return Err(err);
        }
        self.put_state(
            sku,
            TargetProductState {
                price: update.target_price,
                advanced_price: update.target_advanced_price,
                quantity: update.target_quantity,
            },
        );
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderRecord> {
        self.orders
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("order {}", order_id)))
    }

    async fn list_new_orders(&self) -> Result<Vec<OrderRecord>> {
        if let Some(err) = self.list_failure.lock().unwrap().clone() {
            return Err(err);
        }
        let imported = self.imported.lock().unwrap();
        let mut orders: Vec<OrderRecord> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|order| !imported.contains(&order.order_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(orders)
    }

    async fn mark_order_imported(&self, order_id: &str) -> Result<()> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_marker.lock().unwrap() {
            return Err(SyncError::TargetUnavailable("comment endpoint 503".into()));
        }
        self.imported.lock().unwrap().insert(order_id.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<SyncOutcome>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<SyncOutcome> {
        self.alerts.lock().unwrap().clone()
    }

    /// Alerts are delivered off the sync path; yield until `count` arrived
    pub async fn wait_for_alerts(&self, count: usize) -> Vec<SyncOutcome> {
        for _ in 0..1000 {
            let alerts = self.alerts();
            if alerts.len() >= count {
                return alerts;
            }
            tokio::task::yield_now().await;
        }
        self.alerts()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, outcome: &SyncOutcome) -> std::result::Result<(), NotifyError> {
        self.alerts.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}

/// Takes `delay` to deliver each alert
pub struct SlowNotifier {
    pub delay: Duration,
    delivered: AtomicUsize,
}

impl SlowNotifier {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            delivered: AtomicUsize::new(0),
        }
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for SlowNotifier {
    async fn notify(&self, _outcome: &SyncOutcome) -> std::result::Result<(), NotifyError> {
        tokio::time::sleep(self.delay).await;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
