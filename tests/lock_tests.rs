/// Read/write lock tests
///
/// Mutual exclusion under real parallelism, FIFO fairness between readers and
/// writers, and cancellation of queued waiters.
/// Run with: cargo test --test lock_tests
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tuplekv::{ReadWriteLock, StoreError};

async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writers_exclude_everyone() {
    let lock = ReadWriteLock::new();
    let writers = Arc::new(AtomicUsize::new(0));
    let readers = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..64 {
        let lock = lock.clone();
        let writers = Arc::clone(&writers);
        let readers = Arc::clone(&readers);
        handles.push(tokio::spawn(async move {
            let (writers, readers) = (&writers, &readers);
            if i % 4 == 0 {
                lock.run_write(|| async move {
                    assert_eq!(writers.fetch_add(1, Ordering::SeqCst), 0);
                    assert_eq!(readers.load(Ordering::SeqCst), 0);
                    tokio::task::yield_now().await;
                    writers.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            } else {
                lock.run_read(|| async move {
                    readers.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(writers.load(Ordering::SeqCst), 0);
                    tokio::task::yield_now().await;
                    readers.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    let stats = lock.stats();
    assert_eq!(stats.active_readers, 0);
    assert!(!stats.writer_active);
}

#[tokio::test]
async fn test_queued_writer_goes_before_later_readers() {
    let lock = ReadWriteLock::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let first_reader = lock.read().await.unwrap();

    let writer = tokio::spawn({
        let lock = lock.clone();
        let order = Arc::clone(&order);
        async move {
            let _guard = lock.write().await?;
            order.lock().unwrap().push("writer");
            Ok::<_, StoreError>(())
        }
    });
    settle().await;
    assert_eq!(lock.stats().queued_writers, 1);

    let late_reader = tokio::spawn({
        let lock = lock.clone();
        let order = Arc::clone(&order);
        async move {
            let _guard = lock.read().await?;
            order.lock().unwrap().push("reader");
            Ok::<_, StoreError>(())
        }
    });
    settle().await;
    assert_eq!(lock.stats().queued_readers, 1);

    drop(first_reader);
    writer.await.unwrap().unwrap();
    late_reader.await.unwrap().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["writer", "reader"]);
}

#[tokio::test]
async fn test_run_write_releases_on_error() {
    let lock = ReadWriteLock::new();
    let result: Result<(), StoreError> = lock
        .run_write(|| async { Err(StoreError::Internal("body failed".into())) })
        .await;
    assert!(result.is_err());

    let value = tokio::time::timeout(Duration::from_secs(1), lock.run_read(|| async { Ok(7) }))
        .await
        .expect("lock still held after failed body")
        .unwrap();
    assert_eq!(value, 7);
}

#[tokio::test]
async fn test_aborted_writer_does_not_leak_lock() {
    let lock = ReadWriteLock::new();
    let reader = lock.read().await.unwrap();

    let waiting = tokio::spawn({
        let lock = lock.clone();
        async move { lock.write().await.map(|_| ()) }
    });
    settle().await;
    waiting.abort();
    assert!(waiting.await.unwrap_err().is_cancelled());

    drop(reader);
    let guard = tokio::time::timeout(Duration::from_secs(1), lock.write())
        .await
        .expect("cancelled writer kept the lock")
        .unwrap();
    drop(guard);
    assert_eq!(lock.stats().queued_writers, 0);
}
