//! Background bulk jobs
//!
//! A submitted job returns its ticket at once and runs on a worker pool of
//! `max_concurrent_jobs`. Each job holds a bulk lease for its kind from
//! submission until it finishes, so the same bulk run is never queued twice.

use crate::engine::SyncEngine;
use crate::guard::ConcurrencyGuard;
use crate::model::{BatchReport, Direction};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Products,
    NewOrders,
}

impl JobKind {
    pub fn guard_key(self) -> &'static str {
        match self {
            Self::Products => "bulk:products",
            Self::NewOrders => "bulk:orders",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Self::Products => Direction::Product,
            Self::NewOrders => Direction::Order,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Products => f.write_str("products"),
            Self::NewOrders => f.write_str("new_orders"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTicket {
    pub id: Uuid,
    pub kind: JobKind,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed(BatchReport),
    Failed(String),
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Cancelled)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    /// Another job of the same kind is queued or running
    #[error("{kind} job skipped: already in progress as {holder}")]
    SkippedInProgress { kind: JobKind, holder: Uuid },

    #[error("Unknown job: {0}")]
    UnknownJob(Uuid),
}

struct JobEntry {
    ticket: JobTicket,
    state: watch::Receiver<JobState>,
    cancel: CancellationToken,
}

/// Tracks and runs background bulk jobs
pub struct JobManager {
    engine: Arc<SyncEngine>,
    jobs: Arc<DashMap<Uuid, JobEntry>>,
    workers: Arc<Semaphore>,
    bulk_guard: ConcurrencyGuard,
}

impl JobManager {
    pub fn new(engine: Arc<SyncEngine>, max_concurrent_jobs: usize) -> Self {
        Self {
            engine,
            jobs: Arc::new(DashMap::new()),
            workers: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            bulk_guard: ConcurrencyGuard::without_expiry(),
        }
    }

    /// Queue a bulk run and return its ticket without waiting for it
    pub fn submit(&self, kind: JobKind) -> Result<JobTicket, JobError> {
        let lease = self
            .bulk_guard
            .acquire(kind.guard_key())
            .map_err(|rejected| JobError::SkippedInProgress {
                kind,
                holder: rejected.holder_id,
            })?;

        let ticket = JobTicket {
            id: lease.holder_id(),
            kind,
            submitted_at: Utc::now(),
        };
        let (state_tx, state_rx) = watch::channel(JobState::Queued);
        let cancel = CancellationToken::new();
        self.jobs.insert(
            ticket.id,
            JobEntry {
                ticket: ticket.clone(),
                state: state_rx,
                cancel: cancel.clone(),
            },
        );

        let engine = Arc::clone(&self.engine);
        let workers = Arc::clone(&self.workers);
        let job_id = ticket.id;
        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drop(lease);
                    info!("Job {} ({}) cancelled while queued", job_id, kind);
                    state_tx.send_replace(JobState::Cancelled);
                    return;
                }
                permit = workers.acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                drop(lease);
                state_tx.send_replace(JobState::Failed("worker pool closed".to_string()));
                return;
            };

            info!("Job {} ({}) running", job_id, kind);
            state_tx.send_replace(JobState::Running);
            let result = match kind {
                JobKind::Products => engine.sync_all_products(&cancel).await,
                JobKind::NewOrders => engine.sync_all_new_orders(&cancel).await,
            };
            drop(permit);

            let state = match result {
                Ok(report) if report.cancelled => JobState::Cancelled,
                Ok(report) => JobState::Completed(report),
                Err(e) => {
                    warn!("Job {} ({}) failed: {}", job_id, kind, e);
                    JobState::Failed(e.to_string())
                },
            };
            // Released before publishing so a waiter can resubmit this kind at once
            drop(lease);
            debug!("Job {} ({}) finished", job_id, kind);
            state_tx.send_replace(state);
        });

        info!("Job {} ({}) queued", ticket.id, kind);
        Ok(ticket)
    }

    pub fn status(&self, id: Uuid) -> Result<JobState, JobError> {
        self.jobs
            .get(&id)
            .map(|entry| entry.state.borrow().clone())
            .ok_or(JobError::UnknownJob(id))
    }

    /// Wait until the job reaches a final state
    pub async fn wait(&self, id: Uuid) -> Result<JobState, JobError> {
        let mut state = self
            .jobs
            .get(&id)
            .map(|entry| entry.state.clone())
            .ok_or(JobError::UnknownJob(id))?;

        let finished = state
            .wait_for(JobState::is_finished)
            .await
            .map(|state| (*state).clone());
        match finished {
            Ok(state) => Ok(state),
            // Worker task ended without publishing a final state
            Err(_) => Ok(JobState::Failed("job task aborted".to_string())),
        }
    }

    /// Request cancellation; in-flight entity syncs are dropped and release their leases
    pub fn cancel(&self, id: Uuid) -> Result<(), JobError> {
        let entry = self.jobs.get(&id).ok_or(JobError::UnknownJob(id))?;
        if !entry.state.borrow().is_finished() {
            info!("Cancelling job {} ({})", id, entry.ticket.kind);
            entry.cancel.cancel();
        }
        Ok(())
    }

    pub fn cancel_all(&self) {
        for entry in self.jobs.iter() {
            if !entry.state.borrow().is_finished() {
                entry.cancel.cancel();
            }
        }
    }

    pub fn list(&self) -> Vec<(JobTicket, JobState)> {
        let mut jobs: Vec<_> = self
            .jobs
            .iter()
            .map(|entry| (entry.ticket.clone(), entry.state.borrow().clone()))
            .collect();
        jobs.sort_by_key(|(ticket, _)| ticket.submitted_at);
        jobs
    }

    /// Drop finished jobs from the table; returns how many were removed
    pub fn forget_finished(&self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| !entry.state.borrow().is_finished());
        before - self.jobs.len()
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs
            .iter()
            .filter(|entry| !entry.state.borrow().is_finished())
            .count()
    }
}
