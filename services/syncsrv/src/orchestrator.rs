//! Bulk runs over a whole entity set
//!
//! Runs the per-entity sync for every key with at most `parallelism` in
//! flight. Individual failures are recorded in the report; they never abort
//! the batch. Cancelling the token stops admission and drops in-flight
//! syncs, whose leases release on drop.

use crate::model::{BatchReport, Direction, SyncOutcome};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::pin::pin;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drop empty and repeated keys, keeping first-seen order
pub fn dedup_keys(keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.into_iter()
        .filter(|key| !key.trim().is_empty())
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Run `sync_one` for every key and aggregate the outcomes
pub async fn run_batch<F, Fut>(
    direction: Direction,
    keys: Vec<String>,
    parallelism: usize,
    cancel: &CancellationToken,
    sync_one: F,
) -> BatchReport
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = SyncOutcome>,
{
    let keys = dedup_keys(keys);
    let mut report = BatchReport::new(direction, keys.len());
    info!(
        "Batch {} started: {} {} keys, parallelism {}",
        report.batch_id,
        keys.len(),
        direction,
        parallelism
    );

    {
        // In-flight syncs are dropped at the end of this scope
        let mut outcomes = pin!(stream::iter(keys)
            .map(sync_one)
            .buffer_unordered(parallelism.max(1)));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    warn!(
                        "Batch {} cancelled after {}/{} keys",
                        report.batch_id,
                        report.completed(),
                        report.total
                    );
                    break;
                }
                next = outcomes.next() => match next {
                    Some(outcome) => report.record(outcome),
                    None => break,
                },
            }
        }
    }

    let report = report.finish();
    info!(
        "Batch {} finished: total={} success={} no_change={} skipped={} failed={}",
        report.batch_id,
        report.total,
        report.success,
        report.no_change,
        report.skipped_in_progress,
        report.terminal_failure
    );
    report
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::SyncErrorKind;
    use crate::model::SyncStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn keys(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("SKU{}", i)).collect()
    }

    #[test]
    fn test_dedup_keys() {
        let keys = vec![
            "A".to_string(),
            "B".to_string(),
            "A".to_string(),
            " ".to_string(),
            "C".to_string(),
        ];
        assert_eq!(dedup_keys(keys), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let report = run_batch(
            Direction::Product,
            keys(10),
            3,
            &CancellationToken::new(),
            |key| async move {
                if key == "SKU5" {
                    SyncOutcome::terminal_failure(
                        &key,
                        Direction::Product,
                        3,
                        SyncErrorKind::TargetUnavailable,
                        "503",
                    )
                } else {
                    SyncOutcome::success(&key, Direction::Product, 1)
                }
            },
        )
        .await;

        assert_eq!(report.total, 10);
        assert_eq!(report.success, 9);
        assert_eq!(report.terminal_failure, 1);
        assert_eq!(report.failures[0].entity_key, "SKU5");
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_parallelism_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let report = run_batch(
            Direction::Product,
            keys(12),
            3,
            &CancellationToken::new(),
            |key| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    SyncOutcome::no_change(&key, Direction::Product, 1)
                }
            },
        )
        .await;

        assert_eq!(report.no_change, 12);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_batch() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            trigger.cancel();
        });

        let report = run_batch(Direction::Order, keys(100), 2, &cancel, |key| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            SyncOutcome::success(&key, Direction::Order, 1)
        })
        .await;

        assert!(report.cancelled);
        assert!(report.completed() < 100);
        assert!(report
            .failures
            .iter()
            .all(|o| o.status == SyncStatus::TerminalFailure));
    }
}
