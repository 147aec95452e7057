use async_trait::async_trait;
use futures::stream::BoxStream;
use std::future::Future;

use crate::core::{Condition, Entry, Result, Tuple};

/// Lazily evaluated, ordered result of a range scan.
///
/// A stream owns the view it reads from: it stays readable after the scope
/// that produced it has ended, always observes the point in time it was
/// opened at, and may be dropped at any item without further cleanup.
pub type EntryStream<V> = BoxStream<'static, Result<Entry<V>>>;

/// Read-only view of a store fixed at one point in logical time.
#[async_trait]
pub trait Snapshot<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &Tuple) -> Result<Option<V>>;

    /// Scan entries satisfying `condition`, ascending for lower bounds and
    /// descending for upper bounds.
    fn query(&self, condition: Condition) -> EntryStream<V>;
}

/// A snapshot with buffered writes that become visible atomically on commit.
#[async_trait]
pub trait Transaction<V>: Snapshot<V>
where
    V: Send + Sync + 'static,
{
    async fn put(&self, key: Tuple, value: V) -> Result<()>;

    async fn delete(&self, key: &Tuple) -> Result<()>;
}

/// A tuple-keyed store handing out scoped snapshots and transactions.
///
/// The closures receive owned handles. Handles that outlive their scope
/// reject further use with [`StoreError::Closed`](crate::StoreError::Closed).
#[async_trait]
pub trait KvStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    type Snapshot: Snapshot<V> + Clone + 'static;
    type Transaction: Transaction<V> + Clone + 'static;

    /// Run `f` against a fresh read-only snapshot.
    async fn snapshot<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Self::Snapshot) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send;

    /// Run `f` against a fresh transaction, committing when it returns `Ok`
    /// and discarding every buffered write when it returns `Err`.
    ///
    /// Implementations may call `f` more than once.
    async fn transact<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnMut(Self::Transaction) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send;

    async fn close(&self, reason: &str) -> Result<()>;
}
