//! Periodic bulk syncs for `serve` mode

use crate::config::ScheduleConfig;
use crate::jobs::{JobError, JobKind, JobManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configured (kind, interval) pairs; unset intervals are not scheduled
pub fn schedule_entries(schedule: &ScheduleConfig) -> Vec<(JobKind, Duration)> {
    [
        (JobKind::Products, schedule.products_interval_secs),
        (JobKind::NewOrders, schedule.orders_interval_secs),
    ]
    .into_iter()
    .filter_map(|(kind, secs)| secs.map(|secs| (kind, Duration::from_secs(secs))))
    .collect()
}

pub struct Scheduler {
    jobs: Arc<JobManager>,
    schedule: ScheduleConfig,
}

impl Scheduler {
    pub fn new(jobs: Arc<JobManager>, schedule: ScheduleConfig) -> Self {
        Self { jobs, schedule }
    }

    /// Submit jobs on every tick until `shutdown` fires, then cancel what is still running
    pub async fn run(&self, shutdown: CancellationToken) {
        let entries = schedule_entries(&self.schedule);
        if entries.is_empty() {
            info!("No sync schedule configured, waiting for shutdown");
        }

        let loops = entries
            .into_iter()
            .map(|(kind, every)| self.run_every(kind, every, &shutdown));
        futures::future::join_all(loops).await;
        shutdown.cancelled().await;

        self.jobs.cancel_all();
        info!("Scheduler stopped");
    }

    async fn run_every(&self, kind: JobKind, every: Duration, shutdown: &CancellationToken) {
        info!("Scheduling {} sync every {:?}", kind, every);
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.jobs.forget_finished();
                    if removed > 0 {
                        debug!("Dropped {} finished jobs", removed);
                    }
                    match self.jobs.submit(kind) {
                        Ok(ticket) => debug!("Scheduled {} job {}", kind, ticket.id),
                        Err(JobError::SkippedInProgress { holder, .. }) => {
                            info!("Scheduled {} sync skipped, job {} still running", kind, holder)
                        },
                        Err(e) => warn!("Scheduled {} sync not submitted: {}", kind, e),
                    }
                }
            }
        }
    }
}
