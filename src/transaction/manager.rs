// ============================================================================
// MVCC Store
// ============================================================================

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

use super::config::{GcPolicy, MvccConfig};
use super::gc::{self, GcReport};
use super::handle::{MvccSnapshot, MvccTransaction};
use super::record::{
    HeadState, MvccRecord, head_key, log_key, parse_log_key, read_head, version_key,
};
use super::registry::ReaderRegistry;
use super::state::{ReadSet, TransactionId, TransactionState, WriteSet};
use crate::core::{Condition, Result, StoreError};
use crate::storage::{KvStore, Snapshot, Transaction};

/// Optimistic multi-version store layered over a serialized base store.
///
/// Transactions run concurrently against their own start sequence and only
/// touch the base store twice: for versioned reads, and for one short write
/// transaction at commit that validates the read-set and appends the new
/// versions. Losers of a validation race are re-run transparently up to
/// [`MvccConfig::conflict_retry_count`] times.
pub struct MvccStore<S, V> {
    inner: Arc<MvccInner<S, V>>,
}

impl<S, V> Clone for MvccStore<S, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct MvccInner<S, V> {
    pub(crate) base: S,
    config: MvccConfig,
    registry: ReaderRegistry,
    counters: Counters,
    closed: Mutex<Option<String>>,
    _values: PhantomData<fn() -> V>,
}

#[derive(Default)]
struct Counters {
    commits: AtomicU64,
    writing_commits: AtomicU64,
    conflicts: AtomicU64,
    retries: AtomicU64,
    gc_passes: AtomicU64,
    versions_collected: AtomicU64,
}

/// Point-in-time counters of an [`MvccStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MvccStats {
    pub commits: u64,
    pub conflicts: u64,
    pub retries: u64,
    pub gc_passes: u64,
    pub versions_collected: u64,
    pub open_readers: usize,
    pub committed_sequence: u64,
}

impl std::fmt::Display for MvccStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "MVCC Statistics:")?;
        writeln!(f, "  Commits: {}", self.commits)?;
        writeln!(f, "  Conflicts: {}", self.conflicts)?;
        writeln!(f, "  Retries: {}", self.retries)?;
        writeln!(f, "  GC passes: {}", self.gc_passes)?;
        writeln!(f, "  Records collected: {}", self.versions_collected)?;
        writeln!(f, "  Open readers: {}", self.open_readers)?;
        write!(f, "  Committed sequence: {}", self.committed_sequence)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fail with a conflict if any commit after `start` wrote a key this attempt
/// read, or a key it is about to write.
async fn validate<V, H>(
    handle: &H,
    id: TransactionId,
    start: u64,
    reads: &ReadSet,
    writes: Option<&WriteSet<V>>,
) -> Result<()>
where
    V: Send + Sync + 'static,
    H: Snapshot<MvccRecord<V>> + ?Sized,
{
    let mut log = handle.query(Condition::Gt(log_key(start)));
    while let Some(entry) = log.next().await.transpose()? {
        let Some(seq) = parse_log_key(&entry.key) else {
            break;
        };
        let MvccRecord::Commit { keys, .. } = entry.value else {
            continue;
        };
        let overlap = keys
            .iter()
            .find(|key| reads.intersects(key) || writes.is_some_and(|w| w.contains_key(*key)));
        if let Some(key) = overlap {
            return Err(StoreError::Conflict(format!(
                "{} started at sequence {} but commit {} changed {}",
                id, start, seq, key
            )));
        }
    }
    Ok(())
}

impl<S, V> MvccInner<S, V>
where
    S: KvStore<MvccRecord<V>> + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn ensure_open(&self) -> Result<()> {
        match self.closed.lock()?.as_ref() {
            Some(reason) => Err(StoreError::Closed(format!("mvcc store closed: {}", reason))),
            None => Ok(()),
        }
    }

    /// Validate and apply an attempt. Returns the new sequence number, or
    /// `None` for an attempt that wrote nothing.
    async fn commit(&self, tx: &MvccTransaction<S, V>) -> Result<Option<u64>> {
        let plan = tx.attempt().lock()?.take_for_commit()?;
        let (id, start) = (plan.id, plan.start);

        if plan.writes.is_empty() {
            if !plan.reads.is_empty() {
                let reads = plan.reads;
                self.base
                    .snapshot(move |snap| async move {
                        validate::<V, _>(&snap, id, start, &reads, None).await
                    })
                    .await?;
            }
            debug!("{} committed read-only at sequence {}", id, start);
            return Ok(None);
        }

        let reads = Arc::new(plan.reads);
        let writes = Arc::new(plan.writes);
        let committed_at_ms = now_ms();
        let seq = self
            .base
            .transact(move |btx| {
                let reads = Arc::clone(&reads);
                let writes = Arc::clone(&writes);
                async move {
                    let head = read_head::<V, _>(&btx).await?;
                    validate(&btx, id, start, &reads, Some(writes.as_ref())).await?;

                    let seq = head.seq + 1;
                    for (key, value) in writes.iter() {
                        let version = MvccRecord::Version {
                            value: value.clone(),
                            committed_at_ms,
                        };
                        btx.put(version_key(key, seq), version).await?;
                    }
                    let commit = MvccRecord::Commit {
                        keys: writes.keys().cloned().collect(),
                        committed_at_ms,
                    };
                    btx.put(log_key(seq), commit).await?;
                    let head = HeadState {
                        seq,
                        versions: head.versions + writes.len() as u64,
                    };
                    btx.put(head_key(), head.record()).await?;
                    Ok(seq)
                }
            })
            .await?;

        self.registry.publish(seq);
        debug!("{} committed sequence {} (read at {})", id, seq, start);
        Ok(Some(seq))
    }

    async fn run_attempt<F, Fut, T>(self: &Arc<Self>, f: &mut F) -> Result<T>
    where
        F: FnMut(MvccTransaction<S, V>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let tx = MvccTransaction::new(Arc::clone(self), self.registry.lease());
        let outcome = match f(tx.clone()).await {
            Ok(value) => self.commit(&tx).await.map(|seq| (value, seq)),
            Err(err) => Err(err),
        };

        let state = if outcome.is_ok() {
            TransactionState::Committed
        } else {
            TransactionState::Aborted
        };
        {
            let mut attempt = tx.attempt().lock()?;
            attempt.finish(state);
            if let Err(err) = &outcome {
                debug!("{} {}: {}", attempt.id(), attempt.state(), err);
            }
        }

        let (value, seq) = outcome?;
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        if seq.is_some() {
            self.after_write_commit().await;
        }
        Ok(value)
    }

    async fn after_write_commit(&self) {
        let Some(policy) = &self.config.gc else {
            return;
        };
        let n = self.counters.writing_commits.fetch_add(1, Ordering::Relaxed) + 1;
        if n % policy.every_nth_call != 0 {
            return;
        }
        if let Err(err) = self.collect(policy).await {
            warn!("MvccStore gc pass failed after commit {}: {}", n, err);
        }
    }

    async fn collect(&self, policy: &GcPolicy) -> Result<GcReport> {
        let horizon = self.registry.horizon();
        let now = now_ms();
        let span = info_span!(
            "mvcc.gc",
            horizon,
            batch = policy.max_delete_batch_size
        );

        let report = {
            let policy = policy.clone();
            self.base
                .transact(move |btx| {
                    let policy = policy.clone();
                    async move { gc::collect::<V, _>(&btx, &policy, horizon, now).await }
                })
                .instrument(span.clone())
                .await?
        };

        self.counters.gc_passes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .versions_collected
            .fetch_add(report.deleted as u64, Ordering::Relaxed);
        span.in_scope(|| {
            event!(
                Level::INFO,
                deleted = report.deleted,
                deferred = report.deferred,
                retained_versions = report.retained_versions,
                "gc pass finished"
            )
        });
        Ok(report)
    }
}

impl<S, V> MvccStore<S, V>
where
    S: KvStore<MvccRecord<V>> + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Wrap `base`, resuming from whatever sequence it already holds.
    pub async fn open(base: S, config: MvccConfig) -> Result<Self> {
        config.validate()?;
        let head = base
            .snapshot(|snap| async move { read_head::<V, _>(&snap).await })
            .await?
            .seq;
        info!(
            "MvccStore opened at sequence {} (conflict_retry_count={}, gc={})",
            head,
            config.conflict_retry_count,
            config.gc.is_some()
        );

        Ok(Self {
            inner: Arc::new(MvccInner {
                base,
                config,
                registry: ReaderRegistry::new(head),
                counters: Counters::default(),
                closed: Mutex::new(None),
                _values: PhantomData,
            }),
        })
    }

    pub fn config(&self) -> &MvccConfig {
        &self.inner.config
    }

    /// The wrapped base store.
    pub fn base(&self) -> &S {
        &self.inner.base
    }

    pub fn stats(&self) -> MvccStats {
        let counters = &self.inner.counters;
        MvccStats {
            commits: counters.commits.load(Ordering::Relaxed),
            conflicts: counters.conflicts.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            gc_passes: counters.gc_passes.load(Ordering::Relaxed),
            versions_collected: counters.versions_collected.load(Ordering::Relaxed),
            open_readers: self.inner.registry.open_leases(),
            committed_sequence: self.inner.registry.committed(),
        }
    }

    /// Run one garbage collection pass now, with the configured policy or the
    /// default one when periodic collection is disabled.
    pub async fn collect_garbage(&self) -> Result<GcReport> {
        self.inner.ensure_open()?;
        let policy = self.inner.config.gc.clone().unwrap_or_default();
        self.inner.collect(&policy).await
    }
}

#[async_trait]
impl<S, V> KvStore<V> for MvccStore<S, V>
where
    S: KvStore<MvccRecord<V>> + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Snapshot = MvccSnapshot<S, V>;
    type Transaction = MvccTransaction<S, V>;

    async fn snapshot<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Self::Snapshot) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.inner.ensure_open()?;
        let snapshot = MvccSnapshot::new(Arc::clone(&self.inner), self.inner.registry.lease());
        let result = f(snapshot.clone()).await;
        snapshot.release();
        result
    }

    async fn transact<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(Self::Transaction) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let max_attempts = self.inner.config.conflict_retry_count + 1;
        let mut attempt = 1usize;
        loop {
            self.inner.ensure_open()?;
            let err = match self.inner.run_attempt(&mut f).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_conflict() {
                return Err(err);
            }

            self.inner.counters.conflicts.fetch_add(1, Ordering::Relaxed);
            if attempt >= max_attempts {
                warn!(
                    "MvccStore.transact gave up after {} attempts: {}",
                    attempt, err
                );
                return Err(err);
            }

            let backoff_ms = self.inner.config.retry_backoff.delay_ms(attempt as u32);
            warn!(
                "MvccStore.transact retry on conflict (attempt {} of {}): {} (backoff={}ms)",
                attempt, max_attempts, err, backoff_ms
            );
            self.inner.counters.retries.fetch_add(1, Ordering::Relaxed);
            if backoff_ms > 0 {
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            attempt += 1;
        }
    }

    async fn close(&self, reason: &str) -> Result<()> {
        {
            let mut closed = self.inner.closed.lock()?;
            if closed.is_some() {
                return Ok(());
            }
            *closed = Some(reason.to_string());
        }
        info!("MvccStore closing: {}", reason);
        self.inner.base.close(reason).await
    }
}
