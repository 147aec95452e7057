/// Version garbage collection tests
///
/// Run with: cargo test --test gc_tests
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;
use tuplekv::prelude::*;
use tuplekv::{GcPolicy, MemoryMvccStore, MvccStore, RetryBackoff, open_in_memory};

/// Policy that never fires on its own and treats every superseded version as
/// stale.
fn manual_policy() -> GcPolicy {
    GcPolicy::default()
        .every_nth_call(u64::MAX)
        .stale_after(Duration::ZERO)
}

async fn open(gc: Option<GcPolicy>) -> MemoryMvccStore<i64> {
    let config = MvccConfig::new().retry_backoff(RetryBackoff::none());
    let config = match gc {
        Some(policy) => config.gc(policy),
        None => config.without_gc(),
    };
    open_in_memory(config).await.unwrap()
}

async fn put(store: &MemoryMvccStore<i64>, key: Tuple, value: i64) {
    store
        .transact(|tx| {
            let key = key.clone();
            async move { tx.put(key, value).await }
        })
        .await
        .unwrap();
}

async fn read(store: &MemoryMvccStore<i64>, key: Tuple) -> Option<i64> {
    store
        .snapshot(|s| async move { s.get(&key).await })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_open_snapshot_keeps_its_versions() {
    let store = open(Some(manual_policy())).await;
    put(&store, tuple!["k"], 1).await;

    let barrier = Arc::new(Barrier::new(2));
    let reader = tokio::spawn({
        let store = store.clone();
        let barrier = Arc::clone(&barrier);
        async move {
            store
                .snapshot(|s| async move {
                    barrier.wait().await;
                    barrier.wait().await;
                    s.get(&tuple!["k"]).await
                })
                .await
        }
    });

    barrier.wait().await;
    put(&store, tuple!["k"], 2).await;
    put(&store, tuple!["k"], 3).await;
    let report = store.collect_garbage().await.unwrap();
    assert_eq!(report.horizon, 1);
    assert_eq!(report.retained_versions, 3);
    barrier.wait().await;

    assert_eq!(reader.await.unwrap().unwrap(), Some(1));

    let report = store.collect_garbage().await.unwrap();
    assert_eq!(report.horizon, 3);
    assert_eq!(report.retained_versions, 1);
    assert_eq!(report.deferred, 0);
    assert_eq!(read(&store, tuple!["k"]).await, Some(3));
}

#[tokio::test]
async fn test_pass_respects_batch_size() {
    let store = open(Some(manual_policy().max_delete_batch_size(3))).await;
    for i in 1..=10 {
        put(&store, tuple!["k"], i).await;
    }

    let first = store.collect_garbage().await.unwrap();
    assert_eq!(first.deleted, 3);
    assert!(first.deferred > 0);
    assert_eq!(first.retained_versions, 7);

    let mut passes = 1;
    let mut last = first;
    while last.deferred > 0 {
        last = store.collect_garbage().await.unwrap();
        assert!(last.deleted <= 3);
        passes += 1;
        assert!(passes < 20, "gc never caught up");
    }

    assert_eq!(last.retained_versions, 1);
    assert_eq!(read(&store, tuple!["k"]).await, Some(10));
    // head record plus the one live version
    assert_eq!(store.base().len().unwrap(), 2);
}

#[tokio::test]
async fn test_periodic_pass_runs_every_nth_commit() {
    let policy = GcPolicy::default()
        .every_nth_call(2)
        .stale_after(Duration::ZERO);
    let store = open(Some(policy)).await;
    for i in 1..=4 {
        put(&store, tuple!["k"], i).await;
    }

    let stats = store.stats();
    assert_eq!(stats.gc_passes, 2);
    assert!(stats.versions_collected > 0);
    assert_eq!(store.base().len().unwrap(), 2);
    assert_eq!(read(&store, tuple!["k"]).await, Some(4));
}

#[tokio::test]
async fn test_read_only_commits_do_not_trigger_gc() {
    let store = open(Some(GcPolicy::default().every_nth_call(1))).await;
    for _ in 0..3 {
        store
            .transact(|tx| async move { tx.get(&tuple!["k"]).await })
            .await
            .unwrap();
    }
    assert_eq!(store.stats().gc_passes, 0);
    assert_eq!(store.stats().commits, 3);
}

#[tokio::test]
async fn test_deleted_key_is_fully_collected() {
    let store = open(Some(manual_policy())).await;
    put(&store, tuple!["gone"], 1).await;
    store
        .transact(|tx| async move { tx.delete(&tuple!["gone"]).await })
        .await
        .unwrap();
    put(&store, tuple!["kept"], 7).await;

    let report = store.collect_garbage().await.unwrap();
    assert_eq!(report.retained_versions, 1);
    assert_eq!(read(&store, tuple!["gone"]).await, None);
    assert_eq!(read(&store, tuple!["kept"]).await, Some(7));
    assert_eq!(store.base().len().unwrap(), 2);
}

#[tokio::test]
async fn test_version_budget_overrides_age() {
    let young = GcPolicy::default()
        .every_nth_call(u64::MAX)
        .stale_after(Duration::from_secs(3600));

    let store = open(Some(young.clone().version_threshold(100))).await;
    for i in 1..=4 {
        put(&store, tuple!["k"], i).await;
    }
    assert_eq!(store.collect_garbage().await.unwrap().retained_versions, 4);

    let store = open(Some(young.version_threshold(2))).await;
    for i in 1..=4 {
        put(&store, tuple!["k"], i).await;
    }
    assert_eq!(store.collect_garbage().await.unwrap().retained_versions, 1);
    assert_eq!(read(&store, tuple!["k"]).await, Some(4));
}

#[tokio::test]
async fn test_disabled_gc_keeps_every_version() {
    let store = open(None).await;
    for i in 1..=5 {
        put(&store, tuple!["k"], i).await;
    }

    assert_eq!(store.stats().gc_passes, 0);
    // head + five versions + five commit-log entries
    assert_eq!(store.base().len().unwrap(), 11);
    assert_eq!(read(&store, tuple!["k"]).await, Some(5));
}

#[tokio::test]
async fn test_unbounded_age_threshold_keeps_versions() {
    let policy = GcPolicy::default()
        .every_nth_call(u64::MAX)
        .stale_after(Duration::from_millis(u64::MAX))
        .version_threshold(1_000_000);
    assert_eq!(policy.stale_transaction_threshold_ms, u64::MAX);

    let store = open(Some(policy)).await;
    for i in 1..=4 {
        put(&store, tuple!["k"], i).await;
    }

    let report = store.collect_garbage().await.unwrap();
    assert_eq!(report.retained_versions, 4);
    // only commit-log entries below the horizon go
    assert_eq!(report.deleted, 4);
    assert_eq!(read(&store, tuple!["k"]).await, Some(4));
}

#[tokio::test]
async fn test_version_count_survives_reopen() {
    let store = open(Some(manual_policy())).await;
    for i in 1..=3 {
        put(&store, tuple!["a"], i).await;
    }
    put(&store, tuple!["b"], 1).await;
    assert_eq!(store.collect_garbage().await.unwrap().retained_versions, 2);

    let young = GcPolicy::default()
        .every_nth_call(u64::MAX)
        .stale_after(Duration::from_secs(3600))
        .version_threshold(3);
    let config = MvccConfig::new()
        .retry_backoff(RetryBackoff::none())
        .gc(young);
    let reopened = MvccStore::<_, i64>::open(store.base().clone(), config)
        .await
        .unwrap();

    put(&reopened, tuple!["a"], 4).await;
    // 3 stored versions is within the threshold, so nothing is stale yet
    assert_eq!(reopened.collect_garbage().await.unwrap().retained_versions, 3);

    put(&reopened, tuple!["b"], 2).await;
    let report = reopened.collect_garbage().await.unwrap();
    assert_eq!(report.retained_versions, 2);
    assert_eq!(read(&reopened, tuple!["a"]).await, Some(4));
    assert_eq!(read(&reopened, tuple!["b"]).await, Some(2));
}

#[tokio::test]
async fn test_many_keys_drain_in_bounded_passes() {
    let store = open(Some(manual_policy().max_delete_batch_size(4))).await;
    for key in 0..20 {
        put(&store, tuple!["k", key], 1).await;
        put(&store, tuple!["k", key], 2).await;
    }

    let first = store.collect_garbage().await.unwrap();
    assert_eq!(first.deleted, 4);
    assert!(first.deferred > 0);
    assert_eq!(first.retained_versions, 36);

    let mut last = first;
    let mut passes = 1;
    while last.deferred > 0 {
        last = store.collect_garbage().await.unwrap();
        passes += 1;
        assert!(passes < 50, "gc never caught up");
    }
    assert_eq!(last.retained_versions, 20);
    assert_eq!(store.base().len().unwrap(), 21);
}
