// ============================================================================
// Attempt State
// ============================================================================
//
// Every transaction attempt owns a private read-set and write-set. Reads are
// served from the attempt's start sequence; writes stay buffered until the
// commit validates the read-set against everything committed since.
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use super::registry::ReaderLease;
use crate::core::{Condition, Result, StoreError, Tuple};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a transaction attempt, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// ```text
/// Active ──commit──> Committed
///   │
///   └──abort/conflict──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Point keys and scanned ranges observed by an attempt.
///
/// Ranges are kept as conditions rather than the keys they returned, so a
/// later insert anywhere inside a scanned range still intersects.
#[derive(Debug, Clone, Default)]
pub struct ReadSet {
    keys: BTreeSet<Tuple>,
    ranges: Vec<Condition>,
}

impl ReadSet {
    pub fn record_key(&mut self, key: Tuple) {
        self.keys.insert(key);
    }

    pub fn record_range(&mut self, condition: Condition) {
        if !self.ranges.contains(&condition) {
            self.ranges.push(condition);
        }
    }

    pub fn intersects(&self, key: &Tuple) -> bool {
        self.keys.contains(key) || self.ranges.iter().any(|c| c.matches(key))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len() + self.ranges.len()
    }
}

/// Buffered writes; `None` marks a delete.
pub type WriteSet<V> = BTreeMap<Tuple, Option<V>>;

/// What a point read inside an attempt resolves to.
pub(crate) enum ReadPlan<V> {
    Buffered(Option<V>),
    Versioned(u64),
}

pub(crate) struct AttemptState<V> {
    id: TransactionId,
    state: TransactionState,
    start: u64,
    reads: ReadSet,
    writes: WriteSet<V>,
    lease: Option<ReaderLease>,
}

/// Everything a commit needs, taken out of the attempt.
pub(crate) struct CommitPlan<V> {
    pub(crate) id: TransactionId,
    pub(crate) start: u64,
    pub(crate) reads: ReadSet,
    pub(crate) writes: WriteSet<V>,
}

impl<V: Clone> AttemptState<V> {
    pub(crate) fn new(lease: ReaderLease) -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            start: lease.start(),
            reads: ReadSet::default(),
            writes: BTreeMap::new(),
            lease: Some(lease),
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn start(&self) -> u64 {
        self.start
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(StoreError::Closed(format!(
                "transaction {} is {}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    pub(crate) fn plan_read(&mut self, key: &Tuple) -> Result<ReadPlan<V>> {
        self.ensure_active()?;
        if let Some(buffered) = self.writes.get(key) {
            return Ok(ReadPlan::Buffered(buffered.clone()));
        }
        self.reads.record_key(key.clone());
        Ok(ReadPlan::Versioned(self.start))
    }

    /// Record a scan and return the buffered writes it has to merge, in
    /// ascending key order.
    pub(crate) fn plan_scan(&mut self, condition: &Condition) -> Result<Vec<(Tuple, Option<V>)>> {
        self.ensure_active()?;
        self.reads.record_range(condition.clone());
        Ok(self
            .writes
            .iter()
            .filter(|(key, _)| condition.matches(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    /// Extra lease at this attempt's start, held by a scan stream.
    pub(crate) fn scan_lease(&self) -> Result<ReaderLease> {
        self.ensure_active()?;
        self.lease
            .as_ref()
            .map(ReaderLease::renew)
            .ok_or_else(|| StoreError::Closed(format!("transaction {} has no lease", self.id)))
    }

    pub(crate) fn buffer_write(&mut self, key: Tuple, value: Option<V>) -> Result<()> {
        self.ensure_active()?;
        self.writes.insert(key, value);
        Ok(())
    }

    /// Move the read/write sets out for commit. The attempt stops accepting
    /// operations but keeps its lease until [`finish`](Self::finish).
    pub(crate) fn take_for_commit(&mut self) -> Result<CommitPlan<V>> {
        self.ensure_active()?;
        self.state = TransactionState::Committed;
        Ok(CommitPlan {
            id: self.id,
            start: self.start,
            reads: std::mem::take(&mut self.reads),
            writes: std::mem::take(&mut self.writes),
        })
    }

    /// End the attempt, discarding any buffered state and releasing the
    /// lease.
    pub(crate) fn finish(&mut self, outcome: TransactionState) {
        self.state = outcome;
        self.reads = ReadSet::default();
        self.writes.clear();
        self.lease = None;
    }
}
