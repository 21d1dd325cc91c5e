//! Per-entity mutual exclusion
//!
//! The lease table is the only shared mutable state of the engine. Admission
//! is a single check-and-set on the map entry, so two callers can never both
//! hold a lease for the same key. A second request is rejected, not queued.
//!
//! Leases release themselves on drop, which covers completion, errors and
//! cancellation alike. A lease older than the timeout may be taken over by
//! the next acquirer.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct LeaseRecord {
    holder_id: Uuid,
    acquired_at: DateTime<Utc>,
    acquired: Instant,
}

/// Exclusivity token for one entity key
///
/// Dropping the lease releases it, unless it has already been taken over.
#[derive(Debug)]
pub struct SyncLease {
    entity_key: String,
    holder_id: Uuid,
    acquired_at: DateTime<Utc>,
    table: Arc<DashMap<String, LeaseRecord>>,
}

impl SyncLease {
    pub fn entity_key(&self) -> &str {
        &self.entity_key
    }

    pub fn holder_id(&self) -> Uuid {
        self.holder_id
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        let holder = self.holder_id;
        let removed = self
            .table
            .remove_if(&self.entity_key, |_, record| record.holder_id == holder);
        if removed.is_some() {
            debug!("Lease released: {} ({})", self.entity_key, holder);
        }
    }
}

/// Returned when another holder owns a live lease for the key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRejected {
    pub entity_key: String,
    pub holder_id: Uuid,
    pub held_for: Duration,
}

impl std::fmt::Display for LeaseRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} is held by {} for {:?}",
            self.entity_key, self.holder_id, self.held_for
        )
    }
}

/// Lease table shared by manual triggers, bulk batches and background jobs
#[derive(Debug, Clone)]
pub struct ConcurrencyGuard {
    leases: Arc<DashMap<String, LeaseRecord>>,
    lease_timeout: Duration,
}

impl ConcurrencyGuard {
    pub fn new(lease_timeout: Duration) -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
            lease_timeout,
        }
    }

    /// Guard whose leases never go stale; they end only when dropped
    pub fn without_expiry() -> Self {
        Self::new(Duration::MAX)
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// Admit the caller for `entity_key` or reject it immediately
    pub fn acquire(&self, entity_key: &str) -> Result<SyncLease, LeaseRejected> {
        let record = LeaseRecord {
            holder_id: Uuid::new_v4(),
            acquired_at: Utc::now(),
            acquired: Instant::now(),
        };

        match self.leases.entry(entity_key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let held_for = occupied.get().acquired.elapsed();
                if held_for < self.lease_timeout {
                    return Err(LeaseRejected {
                        entity_key: entity_key.to_string(),
                        holder_id: occupied.get().holder_id,
                        held_for,
                    });
                }
                warn!(
                    "Lease for {} held by {} expired after {:?}, taking over",
                    entity_key,
                    occupied.get().holder_id,
                    held_for
                );
                occupied.insert(record.clone());
            },
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
            },
        }

        debug!("Lease acquired: {} ({})", entity_key, record.holder_id);
        Ok(SyncLease {
            entity_key: entity_key.to_string(),
            holder_id: record.holder_id,
            acquired_at: record.acquired_at,
            table: Arc::clone(&self.leases),
        })
    }

    /// Give a lease back; same as dropping it
    pub fn release(&self, lease: SyncLease) {
        drop(lease);
    }

    pub fn is_held(&self, entity_key: &str) -> bool {
        self.leases
            .get(entity_key)
            .map(|record| record.acquired.elapsed() < self.lease_timeout)
            .unwrap_or(false)
    }

    /// Number of entries in the lease table, stale ones included
    pub fn active_leases(&self) -> usize {
        self.leases.len()
    }
}
