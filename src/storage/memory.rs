use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use im::OrdMap;
use std::future::Future;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

use super::contracts::{EntryStream, KvStore, Snapshot, Transaction};
use crate::core::{Condition, Direction, Entry, Result, StoreError, Tuple};
use crate::encoding::{decode_tuple, encode_tuple};
use crate::lock::{LockStats, ReadWriteLock};

type Data<V> = OrdMap<Vec<u8>, V>;

/// In-memory base store.
///
/// Keys are kept in their order-preserving byte encoding, so every tuple
/// range condition is served as a byte-range scan. Transactions run one at a
/// time under the write lock and always start from the latest committed
/// state; snapshots run under the read lock.
pub struct MemoryStore<V> {
    inner: Arc<MemoryInner<V>>,
}

struct MemoryInner<V> {
    lock: ReadWriteLock,
    committed: Mutex<Data<V>>,
    closed: Mutex<Option<String>>,
}

impl<V> Clone for MemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                lock: ReadWriteLock::new(),
                committed: Mutex::new(OrdMap::new()),
                closed: Mutex::new(None),
            }),
        }
    }

    /// Number of committed keys.
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.committed.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn lock_stats(&self) -> LockStats {
        self.inner.lock.stats()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.inner.closed.lock()?.as_ref() {
            Some(reason) => Err(StoreError::Closed(format!("memory store closed: {}", reason))),
            None => Ok(()),
        }
    }

    fn committed(&self) -> Result<Data<V>> {
        Ok(self.inner.committed.lock()?.clone())
    }

    fn publish(&self, data: Data<V>) -> Result<()> {
        *self.inner.committed.lock()? = data;
        Ok(())
    }
}

#[async_trait]
impl<V> KvStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Snapshot = MemorySnapshot<V>;
    type Transaction = MemoryTransaction<V>;

    async fn snapshot<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Self::Snapshot) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.ensure_open()?;
        let _guard = self.inner.lock.read().await?;
        let snapshot = MemorySnapshot {
            data: self.committed()?,
        };
        f(snapshot).await
    }

    async fn transact<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(Self::Transaction) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.ensure_open()?;
        let _guard = self.inner.lock.write().await?;
        // close() may have won the race for the lock
        self.ensure_open()?;

        let tx = MemoryTransaction::new(self.committed()?);
        let result = f(tx.clone()).await;
        let working = tx.finish()?;

        let value = result?;
        self.publish(working)?;
        Ok(value)
    }

    async fn close(&self, reason: &str) -> Result<()> {
        {
            let mut closed = self.inner.closed.lock()?;
            if closed.is_some() {
                return Ok(());
            }
            *closed = Some(reason.to_string());
        }
        // wait for an in-flight transaction before dropping the data
        let _guard = self.inner.lock.write().await?;
        self.publish(OrdMap::new())
    }
}

/// Frozen view of the committed data.
#[derive(Clone)]
pub struct MemorySnapshot<V> {
    data: Data<V>,
}

#[async_trait]
impl<V> Snapshot<V> for MemorySnapshot<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &Tuple) -> Result<Option<V>> {
        Ok(self.data.get(&encode_tuple(key)).cloned())
    }

    fn query(&self, condition: Condition) -> EntryStream<V> {
        scan(self.data.clone(), &condition)
    }
}

/// Working copy of the data, published on commit.
#[derive(Clone)]
pub struct MemoryTransaction<V> {
    state: Arc<Mutex<TxState<V>>>,
}

struct TxState<V> {
    data: Data<V>,
    finished: bool,
}

impl<V> MemoryTransaction<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn new(data: Data<V>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TxState {
                data,
                finished: false,
            })),
        }
    }

    fn working(&self) -> Result<Data<V>> {
        let state = self.state.lock()?;
        if state.finished {
            return Err(finished_error());
        }
        Ok(state.data.clone())
    }

    fn mutate(&self, apply: impl FnOnce(&mut Data<V>)) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.finished {
            return Err(finished_error());
        }
        apply(&mut state.data);
        Ok(())
    }

    fn finish(&self) -> Result<Data<V>> {
        let mut state = self.state.lock()?;
        state.finished = true;
        Ok(std::mem::take(&mut state.data))
    }
}

fn finished_error() -> StoreError {
    StoreError::Closed("memory transaction already finished".into())
}

#[async_trait]
impl<V> Snapshot<V> for MemoryTransaction<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &Tuple) -> Result<Option<V>> {
        let data = self.working()?;
        Ok(data.get(&encode_tuple(key)).cloned())
    }

    fn query(&self, condition: Condition) -> EntryStream<V> {
        match self.working() {
            Ok(data) => scan(data, &condition),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }
}

#[async_trait]
impl<V> Transaction<V> for MemoryTransaction<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn put(&self, key: Tuple, value: V) -> Result<()> {
        let encoded = encode_tuple(&key);
        self.mutate(|data| {
            data.insert(encoded, value);
        })
    }

    async fn delete(&self, key: &Tuple) -> Result<()> {
        let encoded = encode_tuple(key);
        self.mutate(|data| {
            data.remove(&encoded);
        })
    }
}

/// Lazy byte-range scan over an owned map. Each step is one ordered lookup
/// strictly past the previously returned key.
fn scan<V>(data: Data<V>, condition: &Condition) -> EntryStream<V>
where
    V: Clone + Send + Sync + 'static,
{
    let boundary = encode_tuple(condition.boundary());
    let from = if condition.is_inclusive() {
        Bound::Included(boundary)
    } else {
        Bound::Excluded(boundary)
    };
    let direction = condition.direction();

    stream::unfold(Some((data, from)), move |cursor| async move {
        let (data, from) = cursor?;
        let (key, value) = match direction {
            Direction::Ascending => data.range((from, Bound::Unbounded)).next(),
            Direction::Descending => data.range((Bound::Unbounded, from)).next_back(),
        }
        .map(|(k, v)| (k.clone(), v.clone()))?;

        match decode_tuple(&key) {
            Ok(tuple) => Some((
                Ok(Entry::new(tuple, value)),
                Some((data, Bound::Excluded(key))),
            )),
            Err(err) => Some((Err(err), None)),
        }
    })
    .boxed()
}
