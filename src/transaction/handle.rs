use async_trait::async_trait;
use futures::stream::{self, BoxStream, Peekable, StreamExt, TryStreamExt};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use super::manager::MvccInner;
use super::record::{MvccRecord, parse_version_key, version_probe, version_scan};
use super::registry::ReaderLease;
use super::state::{AttemptState, ReadPlan, TransactionId};
use crate::core::{Condition, Direction, Entry, Result, StoreError, Tuple};
use crate::storage::{EntryStream, KvStore, Snapshot, Transaction};

/// Read-only view of an [`MvccStore`](super::MvccStore) at one committed
/// sequence.
pub struct MvccSnapshot<S, V> {
    inner: Arc<MvccInner<S, V>>,
    start: u64,
    lease: Arc<Mutex<Option<ReaderLease>>>,
}

impl<S, V> Clone for MvccSnapshot<S, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            start: self.start,
            lease: Arc::clone(&self.lease),
        }
    }
}

impl<S, V> MvccSnapshot<S, V>
where
    S: KvStore<MvccRecord<V>> + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(inner: Arc<MvccInner<S, V>>, lease: ReaderLease) -> Self {
        Self {
            inner,
            start: lease.start(),
            lease: Arc::new(Mutex::new(Some(lease))),
        }
    }

    /// Committed sequence this snapshot reads at.
    pub fn sequence(&self) -> u64 {
        self.start
    }

    fn closed_error(&self) -> StoreError {
        StoreError::Closed(format!("snapshot at sequence {} is closed", self.start))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.lease.lock()?.is_none() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn scan_lease(&self) -> Result<ReaderLease> {
        self.lease
            .lock()?
            .as_ref()
            .map(ReaderLease::renew)
            .ok_or_else(|| self.closed_error())
    }

    pub(crate) fn release(&self) {
        if let Ok(mut lease) = self.lease.lock() {
            lease.take();
        }
    }
}

#[async_trait]
impl<S, V> Snapshot<V> for MvccSnapshot<S, V>
where
    S: KvStore<MvccRecord<V>> + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &Tuple) -> Result<Option<V>> {
        self.ensure_open()?;
        read_version(&self.inner.base, key, self.start).await
    }

    fn query(&self, condition: Condition) -> EntryStream<V> {
        match self.scan_lease() {
            Ok(lease) => merged_scan(Arc::clone(&self.inner), condition, lease, Vec::new()),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }
}

/// Handle to one transaction attempt.
///
/// Reads see the store as of the attempt's start plus the attempt's own
/// buffered writes; writes are buffered until commit.
pub struct MvccTransaction<S, V> {
    inner: Arc<MvccInner<S, V>>,
    attempt: Arc<Mutex<AttemptState<V>>>,
}

impl<S, V> Clone for MvccTransaction<S, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            attempt: Arc::clone(&self.attempt),
        }
    }
}

impl<S, V> MvccTransaction<S, V>
where
    S: KvStore<MvccRecord<V>> + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(inner: Arc<MvccInner<S, V>>, lease: ReaderLease) -> Self {
        Self {
            inner,
            attempt: Arc::new(Mutex::new(AttemptState::new(lease))),
        }
    }

    pub fn id(&self) -> Result<TransactionId> {
        Ok(self.attempt.lock()?.id())
    }

    /// Committed sequence this attempt reads at.
    pub fn sequence(&self) -> Result<u64> {
        Ok(self.attempt.lock()?.start())
    }

    pub(crate) fn attempt(&self) -> &Arc<Mutex<AttemptState<V>>> {
        &self.attempt
    }
}

#[async_trait]
impl<S, V> Snapshot<V> for MvccTransaction<S, V>
where
    S: KvStore<MvccRecord<V>> + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &Tuple) -> Result<Option<V>> {
        let plan = self.attempt.lock()?.plan_read(key)?;
        match plan {
            ReadPlan::Buffered(value) => Ok(value),
            ReadPlan::Versioned(at) => read_version(&self.inner.base, key, at).await,
        }
    }

    fn query(&self, condition: Condition) -> EntryStream<V> {
        let planned = self
            .attempt
            .lock()
            .map_err(StoreError::from)
            .and_then(|mut attempt| {
                let lease = attempt.scan_lease()?;
                let overlay = attempt.plan_scan(&condition)?;
                Ok((lease, overlay))
            });
        match planned {
            Ok((lease, overlay)) => merged_scan(Arc::clone(&self.inner), condition, lease, overlay),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }
}

#[async_trait]
impl<S, V> Transaction<V> for MvccTransaction<S, V>
where
    S: KvStore<MvccRecord<V>> + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn put(&self, key: Tuple, value: V) -> Result<()> {
        self.attempt.lock()?.buffer_write(key, Some(value))
    }

    async fn delete(&self, key: &Tuple) -> Result<()> {
        self.attempt.lock()?.buffer_write(key.clone(), None)
    }
}

/// Newest version of `key` committed at or before `at`; tombstones read as
/// absent.
pub(crate) async fn read_version<S, V>(base: &S, key: &Tuple, at: u64) -> Result<Option<V>>
where
    S: KvStore<MvccRecord<V>>,
    V: Clone + Send + Sync + 'static,
{
    let probe = version_probe(key, at);
    let key = key.clone();
    base.snapshot(move |snap| async move {
        let mut scan = snap.query(probe);
        let Some(entry) = scan.next().await.transpose()? else {
            return Ok(None);
        };
        match (parse_version_key(&entry.key), entry.value) {
            (Some((found, _)), MvccRecord::Version { value, .. }) if found == key => Ok(value),
            _ => Ok(None),
        }
    })
    .await
}

type RecordStream<V> = Peekable<BoxStream<'static, Result<Entry<MvccRecord<V>>>>>;

/// Collapses the raw version scan into one visible entry per user key.
struct VisibleVersions<V> {
    records: RecordStream<V>,
    at: u64,
}

impl<V> VisibleVersions<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn next(&mut self) -> Option<Result<Entry<V>>> {
        loop {
            let first = match self.records.next().await? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err)),
            };
            // left the version namespace
            let (key, seq) = parse_version_key(&first.key)?;

            let mut best = None;
            Self::consider(&mut best, seq, first.value, self.at);
            loop {
                let same_key = match Pin::new(&mut self.records).peek().await {
                    Some(Ok(next)) => {
                        parse_version_key(&next.key).is_some_and(|(next_key, _)| next_key == key)
                    }
                    _ => false,
                };
                if !same_key {
                    break;
                }
                if let Some(Ok(entry)) = self.records.next().await
                    && let Some((_, seq)) = parse_version_key(&entry.key)
                {
                    Self::consider(&mut best, seq, entry.value, self.at);
                }
            }

            if let Some((_, Some(value))) = best {
                return Some(Ok(Entry::new(key, value)));
            }
        }
    }

    fn consider(best: &mut Option<(u64, Option<V>)>, seq: u64, record: MvccRecord<V>, at: u64) {
        if seq > at {
            return;
        }
        if let MvccRecord::Version { value, .. } = record
            && best.as_ref().is_none_or(|(best_seq, _)| seq > *best_seq)
        {
            *best = Some((seq, value));
        }
    }
}

/// Merges committed entries with an attempt's buffered writes, in scan order.
struct MergedScan<V> {
    committed: VisibleVersions<V>,
    pending: Option<Entry<V>>,
    exhausted: bool,
    overlay: VecDeque<(Tuple, Option<V>)>,
    direction: Direction,
    // keeps the versions this scan reads out of reach of GC
    _lease: ReaderLease,
}

impl<V> MergedScan<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn next(&mut self) -> Option<Result<Entry<V>>> {
        loop {
            if self.pending.is_none() && !self.exhausted {
                match self.committed.next().await {
                    Some(Ok(entry)) => self.pending = Some(entry),
                    Some(Err(err)) => {
                        self.exhausted = true;
                        return Some(Err(err));
                    }
                    None => self.exhausted = true,
                }
            }

            // position of the next buffered write relative to the next
            // committed entry, in scan order
            let order = match (&self.pending, self.overlay.front()) {
                (None, None) => return None,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(committed), Some((key, _))) => match self.direction {
                    Direction::Ascending => key.cmp(&committed.key),
                    Direction::Descending => committed.key.cmp(key),
                },
            };

            match order {
                Ordering::Greater => return self.pending.take().map(Ok),
                // buffered write shadows the committed value
                Ordering::Equal => self.pending = None,
                Ordering::Less => {}
            }
            if let Some((key, Some(value))) = self.overlay.pop_front() {
                return Some(Ok(Entry::new(key, value)));
            }
        }
    }
}

/// Lazy scan of `condition` at the lease's sequence, merged with `overlay`
/// (buffered writes already filtered by the condition, ascending).
pub(crate) fn merged_scan<S, V>(
    inner: Arc<MvccInner<S, V>>,
    condition: Condition,
    lease: ReaderLease,
    mut overlay: Vec<(Tuple, Option<V>)>,
) -> EntryStream<V>
where
    S: KvStore<MvccRecord<V>> + 'static,
    V: Clone + Send + Sync + 'static,
{
    let at = lease.start();
    let direction = condition.direction();
    if direction == Direction::Descending {
        overlay.reverse();
    }

    let scan_condition = version_scan(&condition);
    let opened = async move {
        inner
            .base
            .snapshot(move |snap| async move { Ok(snap.query(scan_condition)) })
            .await
    };
    let records = stream::once(opened).try_flatten().boxed().peekable();

    let merged = MergedScan {
        committed: VisibleVersions { records, at },
        pending: None,
        exhausted: false,
        overlay: overlay.into(),
        direction,
        _lease: lease,
    };

    stream::unfold(merged, |mut scan| async move {
        let item = scan.next().await?;
        Some((item, scan))
    })
    .boxed()
}
