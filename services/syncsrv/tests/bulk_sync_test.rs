//! Bulk product and order runs

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use common::{order, product, quick_retry, Harness};
use std::time::Duration;
use syncsrv::model::HealthStatus;
use syncsrv::{ConcurrencyGuard, SyncError, SyncErrorKind};
use tokio_util::sync::CancellationToken;

fn sku(i: usize) -> String {
    format!("SKU{:02}", i)
}

fn seed_products(h: &Harness, count: usize) {
    for i in 1..=count {
        h.source.put_product(product(&sku(i), i as f64, 10.0 + i as f64, None));
    }
}

#[tokio::test]
async fn test_one_failure_does_not_abort_batch() {
    let h = Harness::new();
    seed_products(&h, 10);
    h.target
        .break_sku("SKU05", SyncError::TargetUnavailable("503 Service Unavailable".into()));

    let report = h
        .engine
        .sync_all_products(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 10);
    assert_eq!(report.success, 9);
    assert_eq!(report.terminal_failure, 1);
    assert!(!report.cancelled);
    assert!(report.finished_at.is_some());

    let failure = &report.failures[0];
    assert_eq!(failure.entity_key, "SKU05");
    assert_eq!(failure.attempt_count, 3);
    assert_eq!(failure.error_kind, Some(SyncErrorKind::TargetUnavailable));
    assert_eq!(h.notifier.wait_for_alerts(1).await.len(), 1);
}

#[tokio::test]
async fn test_rerun_reports_no_change() {
    let h = Harness::new();
    seed_products(&h, 5);
    let cancel = CancellationToken::new();

    h.engine.sync_all_products(&cancel).await.unwrap();
    let report = h.engine.sync_all_products(&cancel).await.unwrap();

    assert_eq!(report.no_change, 5);
    assert_eq!(report.success, 0);
    assert_eq!(h.target.update_calls(), 5);
}

#[tokio::test]
async fn test_enumeration_failure_fails_the_batch() {
    let h = Harness::new();
    seed_products(&h, 3);
    h.source
        .fail_listing(Some(SyncError::SourceUnavailable("connection refused".into())));

    let err = h
        .engine
        .sync_all_products(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SyncErrorKind::SourceUnavailable);
    assert_eq!(h.source.get_product_calls(), 0);
}

#[tokio::test]
async fn test_listed_keys_are_deduplicated() {
    let h = Harness::new();
    seed_products(&h, 3);
    h.source.list_extra_sku("SKU01");
    h.source.list_extra_sku("GHOST");

    let report = h
        .engine
        .sync_all_products(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.success, 3);
    assert_eq!(report.terminal_failure, 1);
    assert_eq!(report.failures[0].error_kind, Some(SyncErrorKind::NotFound));
}

#[tokio::test]
async fn test_held_entity_is_skipped_in_batch() {
    let h = Harness::new();
    seed_products(&h, 4);
    let _lease = h.engine.guard().acquire("product:SKU03").unwrap();

    let report = h
        .engine
        .sync_all_products(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.success, 3);
    assert_eq!(report.skipped_in_progress, 1);
    assert!(h.target.state("SKU03").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_parallelism_is_bounded() {
    let h = Harness::with(
        quick_retry(3),
        ConcurrencyGuard::new(Duration::from_secs(300)),
        3,
    );
    seed_products(&h, 12);
    h.source.stall_products(Duration::from_millis(50));

    let report = h
        .engine
        .sync_all_products(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.success, 12);
    assert_eq!(h.source.in_flight.peak(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_batch_and_releases_leases() {
    let h = Harness::with(
        quick_retry(3),
        ConcurrencyGuard::new(Duration::from_secs(300)),
        2,
    );
    seed_products(&h, 20);
    h.source.stall_products(Duration::from_secs(1));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        trigger.cancel();
    });

    let report = h.engine.sync_all_products(&cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(report.completed() < 20);
    assert_eq!(h.engine.guard().active_leases(), 0);
}

#[tokio::test]
async fn test_new_orders_batch_imports_each_once() {
    let h = Harness::new();
    for id in ["100", "101", "102"] {
        h.target.put_order(order(id, &["A1"]));
    }
    let cancel = CancellationToken::new();

    let report = h.engine.sync_all_new_orders(&cancel).await.unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.success, 3);
    assert_eq!(h.source.order_count(), 3);

    // Imported orders carry the marker and are no longer listed
    let rerun = h.engine.sync_all_new_orders(&cancel).await.unwrap();
    assert_eq!(rerun.total, 0);
    assert_eq!(h.source.create_order_calls(), 3);
}

#[tokio::test]
async fn test_order_listing_failure_fails_the_batch() {
    let h = Harness::new();
    h.target
        .fail_listing(Some(SyncError::RateLimited("429".into())));

    let err = h
        .engine
        .sync_all_new_orders(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SyncErrorKind::RateLimited);
}

#[tokio::test]
async fn test_health_reports_degraded_source() {
    let h = Harness::new();
    let report = h.engine.health().await;
    assert_eq!(report.status, HealthStatus::Healthy);

    h.source
        .fail_listing(Some(SyncError::SourceUnavailable("refused".into())));
    let report = h.engine.health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(!report.source.reachable);
    assert!(report.target.reachable);
    assert!(report.source.error.is_some());
}
