//! Domain records exchanged between the clients, the mapper and the engine

use crate::error::{SyncError, SyncErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Decimals kept by the target for prices (6) and stock quantities (4);
/// amounts are compared at the coarser of the two
pub const AMOUNT_DECIMALS: i32 = 4;

fn round_amount(value: f64) -> f64 {
    let scale = 10f64.powi(AMOUNT_DECIMALS);
    (value * scale).round() / scale
}

/// Equal once both sides are rounded to the precision the target stores
pub fn amounts_equal(a: f64, b: f64) -> bool {
    round_amount(a) == round_amount(b)
}

// ============================================================================
// Products (source -> target)
// ============================================================================

/// Product as held by the source system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub sku: String,
    pub quantity: f64,
    pub retail_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_price: Option<f64>,
}

/// Target-side write derived from a [`ProductRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedProductUpdate {
    pub sku: String,
    pub target_price: f64,
    /// `None` clears any scheduled discount on the target
    pub target_advanced_price: Option<f64>,
    pub target_quantity: f64,
}

/// Current price/advanced price/quantity of a product on the target
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetProductState {
    pub price: f64,
    pub advanced_price: Option<f64>,
    pub quantity: f64,
}

impl MappedProductUpdate {
    /// True when writing this update would not change the target
    pub fn matches(&self, state: &TargetProductState) -> bool {
        let advanced_equal = match (self.target_advanced_price, state.advanced_price) {
            (Some(a), Some(b)) => amounts_equal(a, b),
            (None, None) => true,
            _ => false,
        };
        amounts_equal(self.target_price, state.price)
            && advanced_equal
            && amounts_equal(self.target_quantity, state.quantity)
    }
}

// ============================================================================
// Orders (target -> source)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub qty: f64,
    pub unit_price: f64,
}

/// Customer as attached to a target order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomerRef {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    /// ISO 3166-1 alpha-2
    #[serde(default)]
    pub country_code: Option<String>,
}

/// Order as held by the target system, where orders originate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub line_items: Vec<OrderLine>,
    pub customer_ref: CustomerRef,
    pub currency: String,
    pub placed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCustomer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOrderLine {
    pub sku: String,
    pub quantity: f64,
    pub price_unit: f64,
}

/// Sales order in the source system's shape, ready to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOrderDraft {
    /// Target order id, stored on the source order as its idempotence reference
    pub external_ref: String,
    pub customer: SourceCustomer,
    pub lines: Vec<SourceOrderLine>,
    pub currency: String,
    pub date_order: DateTime<Utc>,
}

// ============================================================================
// Outcomes and reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Product,
    Order,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Order => "order",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    NoChange,
    SkippedInProgress,
    TransientFailure,
    TerminalFailure,
}

/// Result of one sync attempt or of a whole guarded sync
///
/// Outcomes are never mutated; a retry produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub entity_key: String,
    pub direction: Direction,
    pub status: SyncStatus,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<SyncErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SyncOutcome {
    fn new(
        entity_key: &str,
        direction: Direction,
        status: SyncStatus,
        attempt_count: u32,
        error: Option<(SyncErrorKind, String)>,
    ) -> Self {
        let (error_kind, error_detail) = match error {
            Some((kind, detail)) => (Some(kind), Some(detail)),
            None => (None, None),
        };
        Self {
            entity_key: entity_key.to_string(),
            direction,
            status,
            attempt_count,
            error_kind,
            error_detail,
            timestamp: Utc::now(),
        }
    }

    pub fn success(entity_key: &str, direction: Direction, attempt_count: u32) -> Self {
        Self::new(entity_key, direction, SyncStatus::Success, attempt_count, None)
    }

    pub fn no_change(entity_key: &str, direction: Direction, attempt_count: u32) -> Self {
        Self::new(entity_key, direction, SyncStatus::NoChange, attempt_count, None)
    }

    pub fn skipped_in_progress(entity_key: &str, direction: Direction) -> Self {
        Self::new(entity_key, direction, SyncStatus::SkippedInProgress, 0, None)
    }

    pub fn transient_failure(
        entity_key: &str,
        direction: Direction,
        attempt_count: u32,
        error: &SyncError,
    ) -> Self {
        Self::new(
            entity_key,
            direction,
            SyncStatus::TransientFailure,
            attempt_count,
            Some((error.kind(), error.detail().to_string())),
        )
    }

    pub fn terminal_failure(
        entity_key: &str,
        direction: Direction,
        attempt_count: u32,
        kind: SyncErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            entity_key,
            direction,
            SyncStatus::TerminalFailure,
            attempt_count,
            Some((kind, detail.into())),
        )
    }

    pub fn is_terminal_failure(&self) -> bool {
        self.status == SyncStatus::TerminalFailure
    }
}

/// Aggregated result of a bulk run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub direction: Direction,
    /// Number of entity keys enumerated for the batch
    pub total: usize,
    pub success: usize,
    pub no_change: usize,
    pub skipped_in_progress: usize,
    pub transient_failure: usize,
    pub terminal_failure: usize,
    /// Terminal failures in completion order
    pub failures: Vec<SyncOutcome>,
    /// Set when the caller cancelled before every key completed
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub fn new(direction: Direction, total: usize) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            direction,
            total,
            success: 0,
            no_change: 0,
            skipped_in_progress: 0,
            transient_failure: 0,
            terminal_failure: 0,
            failures: Vec::new(),
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome.status {
            SyncStatus::Success => self.success += 1,
            SyncStatus::NoChange => self.no_change += 1,
            SyncStatus::SkippedInProgress => self.skipped_in_progress += 1,
            SyncStatus::TransientFailure => self.transient_failure += 1,
            SyncStatus::TerminalFailure => {
                self.terminal_failure += 1;
                self.failures.push(outcome);
            },
        }
    }

    /// Number of keys that produced an outcome
    pub fn completed(&self) -> usize {
        self.success
            + self.no_change
            + self.skipped_in_progress
            + self.transient_failure
            + self.terminal_failure
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    pub fn from_result<T>(result: &Result<T, SyncError>) -> Self {
        match result {
            Ok(_) => Self {
                reachable: true,
                error: None,
            },
            Err(e) => Self {
                reachable: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Reachability of both client capability sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub source: ComponentHealth,
    pub target: ComponentHealth,
    pub active_leases: usize,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(source: ComponentHealth, target: ComponentHealth, active_leases: usize) -> Self {
        let status = if source.reachable && target.reachable {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            source,
            target,
            active_leases,
            checked_at: Utc::now(),
        }
    }
}
