//! Synchronization service between Odoo (source) and Magento (target)
//!
//! Products flow from Odoo to Magento, new orders flow from Magento into
//! Odoo. Every entity sync is guarded by a per-key lease, retried on
//! transient failures and reported as a [`model::SyncOutcome`].

pub mod bootstrap;
pub mod clients;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod jobs;
pub mod mapper;
pub mod model;
pub mod notifier;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod unit;

pub use clients::{SourceSystemClient, TargetSystemClient};
pub use config::SyncsrvConfig;
pub use engine::SyncEngine;
pub use error::{Result, SyncError, SyncErrorKind};
pub use guard::{ConcurrencyGuard, SyncLease};
pub use jobs::{JobKind, JobManager, JobState, JobTicket};
pub use model::{BatchReport, Direction, HealthReport, SyncOutcome, SyncStatus};
pub use notifier::Notifier;
pub use retry::RetryPolicy;
