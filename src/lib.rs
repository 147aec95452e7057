// ============================================================================
// tuplekv Library
// ============================================================================
//
// Tuple-keyed transactional storage:
// - `lock`: FIFO read/write lock with batch reader admission
// - `storage`: store contracts and the serialized in-memory base store
// - `encoding`: order-preserving tuple key encoding
// - `transaction`: optimistic MVCC with conflict retry and version GC
// - `facade`: `Cell` / `Counter` helpers
//
// ============================================================================

pub mod core;
pub mod encoding;
pub mod facade;
pub mod lock;
pub mod prelude;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use core::{Component, Condition, Direction, Entry, Result, StoreError, Tuple};
pub use facade::{Cell, Counter};
pub use lock::ReadWriteLock;
pub use storage::{EntryStream, KvStore, MemoryStore, Snapshot, Transaction};
pub use transaction::{GcPolicy, GcReport, MvccConfig, MvccStats, MvccStore, RetryBackoff};

/// An [`MvccStore`] over an in-memory base store.
///
/// ```
/// use tuplekv::prelude::*;
/// use tuplekv::{MvccConfig, tuple};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> tuplekv::Result<()> {
/// let store = tuplekv::open_in_memory::<i64>(MvccConfig::default()).await?;
/// store
///     .transact(|tx| async move { tx.put(tuple!["answer"], 42).await })
///     .await?;
///
/// let answer = store
///     .snapshot(|s| async move { s.get(&tuple!["answer"]).await })
///     .await?;
/// assert_eq!(answer, Some(42));
/// # Ok(())
/// # }
/// ```
pub type MemoryMvccStore<V> = MvccStore<MemoryStore<transaction::MvccRecord<V>>, V>;

/// Open an [`MvccStore`] on a fresh [`MemoryStore`].
pub async fn open_in_memory<V>(config: MvccConfig) -> Result<MemoryMvccStore<V>>
where
    V: Clone + Send + Sync + 'static,
{
    MvccStore::open(MemoryStore::new(), config).await
}
