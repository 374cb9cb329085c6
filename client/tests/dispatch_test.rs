//! Integration tests for the sync dispatcher against an in-process remote.

mod common;

use common::{local_quantity, open, session, stock, Fault, MockRemote};
use ferry_client::{ClientError, ConnectivitySignal, PassOutcome, PassReport};
use ferry_engine::{EntryStatus, Error, Mutation, StockAdjustment};
use serde_json::json;
use std::time::Duration;

fn completed(outcome: PassOutcome) -> PassReport {
    match outcome {
        PassOutcome::Completed(report) => report,
        other => panic!("expected a completed pass, got {other:?}"),
    }
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn lost_acknowledgement_commits_exactly_once() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;
    stock(&engine, &remote, "beans", 100).await;

    let id = engine
        .enqueue_mutation("staff-1", session("s-1", 20, "beans"))
        .await
        .unwrap();
    assert_eq!(local_quantity(&engine, "beans").await, Some(80));

    remote.fail_next(Fault::LoseAck);
    let report = completed(engine.run_pass().await);
    assert_eq!(report.retried, 1);
    assert_eq!(engine.entry(id).await.unwrap().retry_count, 1);

    let report = completed(engine.run_pass().await);
    assert_eq!(report.synced, 1);
    assert!(engine.entry(id).await.is_none());

    let submissions = remote.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].key, submissions[1].key);
    assert_eq!(remote.commits(), 1);
    assert_eq!(remote.quantity("beans"), Some(80));
    assert_eq!(engine.pending_snapshots().await, 0);
}

#[tokio::test]
async fn every_entry_gets_its_own_key() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;

    for i in 0..3 {
        engine
            .enqueue_mutation(
                "staff-1",
                Mutation::insert("sessions", json!({"id": format!("s-{i}"), "grams": 5})),
            )
            .await
            .unwrap();
    }

    let entries = engine.entries().await;
    assert_eq!(entries.len(), 3);
    assert_ne!(entries[0].idempotency_key, entries[1].idempotency_key);
    assert_ne!(entries[1].idempotency_key, entries[2].idempotency_key);
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn entries_are_submitted_in_id_order_per_table() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;
    stock(&engine, &remote, "beans", 100).await;

    let writes = [
        Mutation::insert("sessions", json!({"id": "s-1", "grams": 10})),
        Mutation::adjust(StockAdjustment::decrement("inventory", "beans", "quantity", 1)),
        Mutation::insert("sessions", json!({"id": "s-2", "grams": 12})),
        common::note("s-1", "first"),
        Mutation::adjust(StockAdjustment::decrement("inventory", "beans", "quantity", 2)),
        common::note("s-1", "second"),
    ];
    for mutation in writes {
        engine.enqueue_mutation("staff-1", mutation).await.unwrap();
    }

    let report = completed(engine.run_pass().await);
    assert_eq!(report.submitted, 6);
    assert_eq!(report.synced, 6);

    let sessions: Vec<_> = remote
        .submissions()
        .into_iter()
        .filter(|s| s.table == "sessions")
        .map(|s| s.record_id)
        .collect();
    assert_eq!(sessions, ["s-1", "s-2", "s-1", "s-1"]);

    // Last write wins on the remote as it did locally.
    assert_eq!(remote.record("sessions", "s-1").unwrap()["note"], "second");
    assert_eq!(remote.quantity("beans"), Some(97));
    assert_eq!(engine.summary().await.total, 0);
}

#[tokio::test]
async fn failed_head_blocks_only_its_table() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;

    let first = engine
        .enqueue_mutation(
            "staff-1",
            Mutation::insert("sessions", json!({"id": "s-1", "grams": 10})),
        )
        .await
        .unwrap();
    remote.fail_next(Fault::Reject("Session limit reached".into()));
    let report = completed(engine.run_pass().await);
    assert_eq!(report.failed, 1);

    let behind = engine
        .enqueue_mutation("staff-1", common::note("s-1", "later"))
        .await
        .unwrap();
    engine
        .enqueue_mutation(
            "staff-1",
            Mutation::insert("orders", json!({"id": "o-1", "total": 450})),
        )
        .await
        .unwrap();

    let report = completed(engine.run_pass().await);
    assert_eq!(report.submitted, 1);
    assert_eq!(report.synced, 1);
    assert!(remote.record("orders", "o-1").is_some());

    assert_eq!(engine.entry(first).await.unwrap().status, EntryStatus::Failed);
    assert_eq!(engine.entry(behind).await.unwrap().status, EntryStatus::Pending);
}

// ============================================================================
// Outcome classification
// ============================================================================

#[tokio::test]
async fn rejection_surfaces_verbatim_and_keeps_the_snapshot() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;
    stock(&engine, &remote, "beans", 10).await;

    let id = engine
        .enqueue_mutation("staff-1", session("s-1", 20, "beans"))
        .await
        .unwrap();

    let report = completed(engine.run_pass().await);
    assert_eq!(report.failed, 1);

    let view = engine.entry(id).await.unwrap();
    assert_eq!(view.status, EntryStatus::Failed);
    assert_eq!(view.error.as_deref(), Some("Insufficient stock for beans"));
    assert_eq!(view.retry_count, 1);

    // Nothing committed remotely; the optimistic effect waits for the operator.
    assert!(remote.record("sessions", "s-1").is_none());
    assert_eq!(remote.quantity("beans"), Some(10));
    assert_eq!(local_quantity(&engine, "beans").await, Some(-10));
    assert_eq!(engine.pending_snapshots().await, 1);
}

#[tokio::test]
async fn transient_failures_give_up_at_the_ceiling() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;
    let id = engine
        .enqueue_mutation(
            "staff-1",
            Mutation::insert("sessions", json!({"id": "s-1", "grams": 10})),
        )
        .await
        .unwrap();

    for attempt in 1..=3u32 {
        remote.fail_next(Fault::Unavailable);
        engine.run_pass().await;
        assert_eq!(engine.entry(id).await.unwrap().retry_count, attempt);
    }

    let view = engine.entry(id).await.unwrap();
    assert_eq!(view.status, EntryStatus::Failed);
    assert!(view
        .error
        .as_deref()
        .unwrap()
        .starts_with("gave up after 3 attempts"));

    // No automatic attempt past the ceiling.
    let report = completed(engine.run_pass().await);
    assert_eq!(report.submitted, 0);
    assert_eq!(remote.submissions().len(), 3);
}

#[tokio::test]
async fn backoff_delays_the_next_attempt() {
    let remote = MockRemote::new();
    let config = common::config().with_retry(ferry_engine::RetryPolicy::new(5, 60_000, 60_000));
    let engine = common::open_with(config, &remote).await;
    engine
        .enqueue_mutation(
            "staff-1",
            Mutation::insert("sessions", json!({"id": "s-1", "grams": 10})),
        )
        .await
        .unwrap();

    remote.fail_next(Fault::Unavailable);
    let report = completed(engine.run_pass().await);
    assert_eq!(report.retried, 1);

    let report = completed(engine.run_pass().await);
    assert_eq!(report.submitted, 0);
    assert_eq!(engine.summary().await.pending, 1);
}

// ============================================================================
// Compound entries
// ============================================================================

#[tokio::test]
async fn compound_failure_midway_retries_as_a_unit() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;
    stock(&engine, &remote, "beans", 100).await;

    engine
        .enqueue_mutation("staff-1", session("s-1", 20, "beans"))
        .await
        .unwrap();

    remote.fail_next(Fault::FailMidway);
    let report = completed(engine.run_pass().await);
    assert_eq!(report.retried, 1);
    assert!(remote.record("sessions", "s-1").is_none());
    assert_eq!(remote.quantity("beans"), Some(100));

    let report = completed(engine.run_pass().await);
    assert_eq!(report.synced, 1);
    assert_eq!(remote.record("sessions", "s-1").unwrap()["grams"], 20);
    assert_eq!(remote.quantity("beans"), Some(80));
}

#[tokio::test]
async fn order_placement_writes_lines_and_deductions_together() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;
    stock(&engine, &remote, "beans", 100).await;
    stock(&engine, &remote, "milk", 5).await;

    engine
        .enqueue_mutation(
            "staff-1",
            Mutation::order_placement(
                "orders",
                json!({"id": "o-1", "total": 900}),
                "order_lines",
                vec![
                    json!({"id": "l-1", "order_id": "o-1", "quantity": 2}),
                    json!({"id": "l-2", "order_id": "o-1", "quantity": 1}),
                ],
                vec![
                    StockAdjustment::decrement("inventory", "beans", "quantity", 36),
                    StockAdjustment::decrement("inventory", "milk", "quantity", 1),
                ],
            ),
        )
        .await
        .unwrap();

    assert!(engine.record("order_lines", "l-2").await.is_some());
    assert_eq!(local_quantity(&engine, "milk").await, Some(4));

    completed(engine.run_pass().await);
    assert!(remote.record("orders", "o-1").is_some());
    assert!(remote.record("order_lines", "l-1").is_some());
    assert!(remote.record("order_lines", "l-2").is_some());
    assert_eq!(remote.quantity("beans"), Some(64));
    assert_eq!(remote.quantity("milk"), Some(4));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn concurrent_decrements_from_two_devices_both_apply() {
    let remote = MockRemote::new();
    let till = open(&remote).await;
    let bar = open(&remote).await;
    stock(&till, &remote, "beans", 100).await;
    bar.refresh_table("inventory").await.unwrap();

    let decrement = || Mutation::adjust(StockAdjustment::decrement("inventory", "beans", "quantity", 3));
    till.enqueue_mutation("staff-1", decrement()).await.unwrap();
    bar.enqueue_mutation("staff-2", decrement()).await.unwrap();

    // Each device only sees its own write until it refetches.
    assert_eq!(local_quantity(&till, "beans").await, Some(97));
    assert_eq!(local_quantity(&bar, "beans").await, Some(97));

    let (a, b) = tokio::join!(till.run_pass(), bar.run_pass());
    assert_eq!(completed(a).synced, 1);
    assert_eq!(completed(b).synced, 1);
    assert_eq!(remote.quantity("beans"), Some(94));

    till.refresh_table("inventory").await.unwrap();
    assert_eq!(local_quantity(&till, "beans").await, Some(94));
}

#[tokio::test]
async fn overlapping_passes_coalesce() {
    let remote = MockRemote::with_delay(Duration::from_millis(100));
    let engine = open(&remote).await;
    engine
        .enqueue_mutation(
            "staff-1",
            Mutation::insert("sessions", json!({"id": "s-1", "grams": 10})),
        )
        .await
        .unwrap();

    let late = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine
            .enqueue_mutation(
                "staff-1",
                Mutation::insert("sessions", json!({"id": "s-2", "grams": 10})),
            )
            .await
            .unwrap();
        engine.run_pass().await
    };
    let (first, second) = tokio::join!(engine.run_pass(), late);

    assert_eq!(second, PassOutcome::Coalesced);
    let report = completed(first);
    assert_eq!(report.submitted, 2);
    assert_eq!(report.synced, 2);
    assert_eq!(remote.submissions().len(), 2);
}

#[tokio::test]
async fn offline_pass_submits_nothing() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;
    engine.connectivity_changed(ConnectivitySignal::Offline);

    engine
        .enqueue_mutation(
            "staff-1",
            Mutation::insert("sessions", json!({"id": "s-1", "grams": 10})),
        )
        .await
        .unwrap();
    assert!(engine.record("sessions", "s-1").await.is_some());

    assert_eq!(engine.run_pass().await, PassOutcome::Offline);
    assert!(remote.submissions().is_empty());

    engine.connectivity_changed(ConnectivitySignal::Online);
    assert_eq!(completed(engine.run_pass().await).synced, 1);
}

// ============================================================================
// Enqueue validation
// ============================================================================

#[tokio::test]
async fn invalid_mutation_is_neither_applied_nor_queued() {
    let remote = MockRemote::new();
    let engine = open(&remote).await;

    let missing_field = Mutation::insert("sessions", json!({"id": "s-1"}));
    let result = engine.enqueue_mutation("staff-1", missing_field).await;
    assert!(matches!(
        result,
        Err(ClientError::Engine(Error::MissingRequiredField(ref f))) if f == "grams"
    ));

    let unknown_table = Mutation::insert("payments", json!({"id": "p-1"}));
    assert!(matches!(
        engine.enqueue_mutation("staff-1", unknown_table).await,
        Err(ClientError::Engine(Error::TableNotFound(_)))
    ));

    let not_a_counter = Mutation::adjust(StockAdjustment::decrement("inventory", "beans", "name", 1));
    assert!(matches!(
        engine.enqueue_mutation("staff-1", not_a_counter).await,
        Err(ClientError::Engine(Error::NotACounter { .. }))
    ));

    assert!(engine.record("sessions", "s-1").await.is_none());
    assert_eq!(engine.summary().await.total, 0);
}
