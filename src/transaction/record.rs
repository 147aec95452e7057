//! Layout of versioned data inside the base store.
//!
//! ```text
//! ("head",)             -> Head { seq }       last committed sequence and
//!                                             number of stored versions
//! ("log", seq)          -> Commit { keys }    keys written by commit `seq`
//! ("ver", key, seq)     -> Version { value }  value of `key` as of `seq`
//! ```
//!
//! The namespaces sort `head < log < ver`, and inside `ver` all versions of
//! one key are contiguous in ascending sequence order.

use serde::{Deserialize, Serialize};

use crate::core::{Component, Condition, Result, StoreError, Tuple};
use crate::storage::Snapshot;

const HEAD: &str = "head";
const LOG: &str = "log";
const VERSION: &str = "ver";

/// Greater than every real sequence number.
const SEQ_CEILING: i64 = i64::MAX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MvccRecord<V> {
    Head {
        seq: u64,
        /// Version records currently stored, tombstones included.
        versions: u64,
    },
    Commit {
        keys: Vec<Tuple>,
        committed_at_ms: i64,
    },
    /// `value: None` is a tombstone.
    Version {
        value: Option<V>,
        committed_at_ms: i64,
    },
}

/// Contents of the head record; all zero in an empty store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct HeadState {
    pub(crate) seq: u64,
    pub(crate) versions: u64,
}

impl HeadState {
    pub(crate) fn record<V>(self) -> MvccRecord<V> {
        MvccRecord::Head {
            seq: self.seq,
            versions: self.versions,
        }
    }
}

pub(crate) async fn read_head<V, H>(handle: &H) -> Result<HeadState>
where
    V: Send + Sync + 'static,
    H: Snapshot<MvccRecord<V>> + ?Sized,
{
    match handle.get(&head_key()).await? {
        None => Ok(HeadState::default()),
        Some(MvccRecord::Head { seq, versions }) => Ok(HeadState { seq, versions }),
        Some(_) => Err(StoreError::Decode(
            "head key holds a non-head record".to_string(),
        )),
    }
}

pub(crate) fn head_key() -> Tuple {
    Tuple::new().with(HEAD)
}

pub(crate) fn log_key(seq: u64) -> Tuple {
    Tuple::new().with(LOG).with(seq as i64)
}

pub(crate) fn log_namespace() -> Tuple {
    Tuple::new().with(LOG)
}

pub(crate) fn version_key(key: &Tuple, seq: u64) -> Tuple {
    Tuple::new()
        .with(VERSION)
        .with(key.clone())
        .with(seq as i64)
}

pub(crate) fn version_namespace() -> Tuple {
    Tuple::new().with(VERSION)
}

pub(crate) fn parse_log_key(key: &Tuple) -> Option<u64> {
    match key.components() {
        [Component::Text(ns), Component::Int(seq)] if ns == LOG => Some(*seq as u64),
        _ => None,
    }
}

pub(crate) fn parse_version_key(key: &Tuple) -> Option<(Tuple, u64)> {
    match key.components() {
        [Component::Text(ns), Component::Tuple(user_key), Component::Int(seq)] if ns == VERSION => {
            Some((user_key.clone(), *seq as u64))
        }
        _ => None,
    }
}

/// Condition whose scan over the version namespace visits exactly the
/// versions of user keys satisfying `condition`, in the same direction. The
/// scan runs off the end of the namespace; callers stop at the first key
/// that does not parse as a version key.
pub(crate) fn version_scan(condition: &Condition) -> Condition {
    let ns = Tuple::new().with(VERSION);
    match condition {
        Condition::Gt(b) => Condition::Gt(ns.with(b.clone()).with(SEQ_CEILING)),
        Condition::Gte(b) => Condition::Gte(ns.with(b.clone())),
        Condition::Lt(b) => Condition::Lt(ns.with(b.clone())),
        Condition::Lte(b) => Condition::Lte(ns.with(b.clone()).with(SEQ_CEILING)),
    }
}

/// Scan whose first hit is the newest version of `key` at or below `seq`,
/// if one exists.
pub(crate) fn version_probe(key: &Tuple, seq: u64) -> Condition {
    Condition::Lte(version_key(key, seq))
}
