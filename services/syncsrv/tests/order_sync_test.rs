//! Order import (target -> source) through the full engine path

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use common::{order, Harness};
use syncsrv::{SyncError, SyncErrorKind, SyncStatus};

#[tokio::test]
async fn test_order_is_created_once_and_marked() {
    let h = Harness::new();
    h.target.put_order(order("100", &["A1", "B2"]));

    let outcome = h.engine.sync_order("100").await;

    assert_eq!(outcome.status, SyncStatus::Success);
    assert_eq!(h.source.order_count(), 1);
    assert!(h.target.is_imported("100"));

    let draft = h.source.order("100").unwrap();
    assert_eq!(draft.external_ref, "100");
    assert_eq!(draft.customer.name, "Jane Doe");
    assert_eq!(draft.customer.country_code.as_deref(), Some("FR"));
    assert_eq!(draft.lines.len(), 2);
    assert_eq!(draft.currency, "EUR");
}

#[tokio::test]
async fn test_repeated_import_is_no_change() {
    let h = Harness::new();
    h.target.put_order(order("100", &["A1"]));

    assert_eq!(h.engine.sync_order("100").await.status, SyncStatus::Success);
    let second = h.engine.sync_order("100").await;

    assert_eq!(second.status, SyncStatus::NoChange);
    assert_eq!(h.source.create_order_calls(), 1);
    assert_eq!(h.source.order_count(), 1);
}

#[tokio::test]
async fn test_marker_failure_keeps_success_and_later_runs_idempotent() {
    let h = Harness::new();
    h.target.put_order(order("101", &["A1"]));
    h.target.fail_marker(true);

    let outcome = h.engine.sync_order("101").await;
    assert_eq!(outcome.status, SyncStatus::Success);
    assert!(!h.target.is_imported("101"));
    assert!(h.notifier.alerts().is_empty());

    // Next run finds the order on the source and sets the marker
    h.target.fail_marker(false);
    let second = h.engine.sync_order("101").await;
    assert_eq!(second.status, SyncStatus::NoChange);
    assert!(h.target.is_imported("101"));
    assert_eq!(h.source.create_order_calls(), 1);
}

#[tokio::test]
async fn test_transient_create_failure_is_retried_without_duplicates() {
    let h = Harness::new();
    h.target.put_order(order("102", &["A1"]));
    h.source
        .fail_create_order(1, SyncError::SourceUnavailable("504 Gateway Timeout".into()));

    let outcome = h.engine.sync_order("102").await;

    assert_eq!(outcome.status, SyncStatus::Success);
    assert_eq!(outcome.attempt_count, 2);
    assert_eq!(h.source.order_count(), 1);
}

#[tokio::test]
async fn test_duplicate_from_source_is_terminal() {
    let h = Harness::new();
    h.target.put_order(order("103", &["A1"]));
    h.source.fail_create_order(
        1,
        SyncError::DuplicateOrder("client_order_ref 103 exists".into()),
    );

    let outcome = h.engine.sync_order("103").await;

    assert_eq!(outcome.status, SyncStatus::TerminalFailure);
    assert_eq!(outcome.error_kind, Some(SyncErrorKind::DuplicateOrder));
    assert_eq!(outcome.attempt_count, 1);
    assert_eq!(h.notifier.wait_for_alerts(1).await.len(), 1);
}

#[tokio::test]
async fn test_order_without_lines_is_mapping_error() {
    let h = Harness::new();
    h.target.put_order(order("104", &[]));

    let outcome = h.engine.sync_order("104").await;

    assert_eq!(outcome.status, SyncStatus::TerminalFailure);
    assert_eq!(outcome.error_kind, Some(SyncErrorKind::MappingError));
    assert_eq!(h.source.create_order_calls(), 0);
    assert!(!h.target.is_imported("104"));
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let h = Harness::new();

    let outcome = h.engine.sync_order("999").await;

    assert_eq!(outcome.status, SyncStatus::TerminalFailure);
    assert_eq!(outcome.error_kind, Some(SyncErrorKind::NotFound));
    assert_eq!(h.target.mark_calls(), 0);
}

#[tokio::test]
async fn test_order_and_product_keys_do_not_collide() {
    let h = Harness::new();
    h.target.put_order(order("100", &["A1"]));
    let product_lease = h.engine.guard().acquire("product:100").unwrap();

    let outcome = h.engine.sync_order("100").await;
    assert_eq!(outcome.status, SyncStatus::Success);

    let _order_lease = h.engine.guard().acquire("order:100").unwrap();
    let skipped = h.engine.sync_order("100").await;
    assert_eq!(skipped.status, SyncStatus::SkippedInProgress);
    drop(product_lease);
}
