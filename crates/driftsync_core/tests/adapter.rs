//! Adapter behaviour against an unreliable store.

use driftsync_core::{AdapterConfig, CoreError, EntityStore};
use driftsync_store::{DocumentStore, InMemoryStore, StoreHandle};
use driftsync_testkit::{at, EntityBuilder, FlakyStore, TestReplica};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn task(id: &str, title: &str) -> driftsync_core::Entity {
    EntityBuilder::new(id)
        .updated_at(at(5))
        .field("title", title)
        .build()
}

#[tokio::test]
async fn stale_revision_is_refetched_exactly_once() {
    let replica = TestReplica::memory("task");
    replica.save(&task("1", "base")).await.unwrap();

    // Another writer moves the revision between our read and our write
    replica.flaky.race_next_puts(1);
    let puts_before = replica.flaky.calls.put.load(Ordering::SeqCst);

    let doc = replica.save(&task("1", "mine")).await.unwrap();

    // The conflicted write and the retried one
    assert_eq!(replica.flaky.calls.put.load(Ordering::SeqCst) - puts_before, 2);
    assert_eq!(doc.generation(), Some(3));
    let stored = replica.get("1").await.unwrap().unwrap();
    assert_eq!(stored.field("title").unwrap(), "mine");
}

#[tokio::test(start_paused = true)]
async fn two_racing_saves_both_succeed() {
    let replica = TestReplica::memory("task");
    replica.save(&task("1", "base")).await.unwrap();
    // Both saves read revision 1 before either writes
    replica.flaky.set_latency(Duration::from_millis(10));
    let puts_before = replica.flaky.calls.put.load(Ordering::SeqCst);

    let task_a = task("1", "from a");
    let task_b = task("1", "from b");
    let (a, b) = tokio::join!(replica.save(&task_a), replica.save(&task_b));
    a.unwrap();
    b.unwrap();

    let stored = replica.flaky.inner().get("task-1").await.unwrap();
    assert_eq!(stored.generation(), Some(3));
    // One of them retried exactly once
    assert_eq!(replica.flaky.calls.put.load(Ordering::SeqCst) - puts_before, 3);
}

#[tokio::test]
async fn persistent_conflict_escalates() {
    let replica = TestReplica::memory("task");
    replica.flaky.conflict_next_writes(2);

    let err = replica.save(&task("1", "a")).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict { ref id } if id == "task-1"));
}

#[tokio::test]
async fn delete_refetches_after_conflict() {
    let replica = TestReplica::memory("task");
    replica.save(&task("1", "a")).await.unwrap();
    replica.flaky.conflict_next_writes(1);

    assert!(replica.delete("1").await.unwrap());
    assert!(replica.flaky.inner().is_empty());
}

#[tokio::test]
async fn outage_within_budget_is_invisible() {
    let replica = TestReplica::memory("task");
    replica.flaky.fail_next_calls(3);

    replica.save(&task("1", "a")).await.unwrap();
    assert_eq!(replica.flaky.inner().len(), 1);
}

#[tokio::test]
async fn outage_beyond_budget_is_fatal() {
    let replica = TestReplica::memory("task");
    replica.flaky.fail_next_calls(4);

    let err = replica.load_all().await.unwrap_err();
    assert!(err.is_fatal());
    match err {
        CoreError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn retry_picks_up_a_replaced_store() {
    let dead = Arc::new(FlakyStore::memory());
    dead.fail_next_calls(u32::MAX);
    let handle = Arc::new(StoreHandle::new(dead.clone()));
    let config = AdapterConfig::for_kind("task").unwrap();
    let adapter = Arc::new(EntityStore::new(handle.clone(), config).unwrap());

    let save = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.save(&task("1", "a")).await }
    });

    // The first attempt fails and backs off for 300ms
    tokio::time::sleep(Duration::from_millis(100)).await;
    let live = Arc::new(InMemoryStore::new());
    handle.replace(live.clone());

    save.await.unwrap().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(dead.calls.total(), 1);
}

#[tokio::test]
async fn save_many_uses_one_scan_and_one_bulk_write() {
    let replica = TestReplica::memory("task");
    let batch: Vec<_> = (0..5).map(|i| task(&i.to_string(), "x")).collect();

    let outcomes = replica.save_many(&batch).await.unwrap();
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(replica.flaky.calls.bulk_docs.load(Ordering::SeqCst), 1);
    assert_eq!(replica.flaky.calls.all_docs.load(Ordering::SeqCst), 1);

    let updated: Vec<_> = (0..5).map(|i| task(&i.to_string(), "y")).collect();
    let outcomes = replica.save_many(&updated).await.unwrap();
    assert!(outcomes.iter().all(|o| o.is_ok()));
    let all = replica.load_all().await.unwrap();
    assert!(all.iter().all(|e| e.field("title").unwrap() == "y"));
}

#[tokio::test]
async fn sweep_through_outage() {
    let replica = TestReplica::memory("task");
    for id in ["1", "2", "3"] {
        replica.save(&task(id, id)).await.unwrap();
    }
    replica.flaky.fail_next_calls(1);

    let keep: HashSet<String> = ["1", "3"].into_iter().map(String::from).collect();
    let report = replica.sync_deleted(&keep).await.unwrap();
    assert_eq!(report.removed, vec!["2".to_string()]);

    let remaining: Vec<_> = replica
        .load_all()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(remaining, vec!["1", "3"]);
}
