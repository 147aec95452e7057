// ============================================================================
// Version Garbage Collection
// ============================================================================
//
// A pass runs inside one base write transaction. It never touches anything an
// open reader can still observe: a version is only removed once a newer
// version of the same key is visible at the horizon, and commit-log entries
// are only removed at or below the horizon, where no open attempt validates.
//
// ============================================================================

use futures::StreamExt;

use super::config::GcPolicy;
use super::record::{
    HeadState, MvccRecord, head_key, log_namespace, parse_log_key, parse_version_key, read_head,
    version_key, version_namespace,
};
use crate::core::{Condition, Entry, Result, Tuple};
use crate::storage::Transaction;

/// Outcome of one garbage collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Records removed by this pass (versions and commit-log entries).
    pub deleted: usize,
    /// Eligible records left for a later pass because of the batch limit.
    /// The scan stops shortly after the batch fills, so this is a lower
    /// bound: zero means nothing eligible is left.
    pub deferred: usize,
    /// Versions still stored after the pass.
    pub retained_versions: usize,
    /// Sequence number the pass treated as the oldest one still readable.
    pub horizon: u64,
}

impl std::fmt::Display for GcReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "deleted={} deferred={} retained_versions={} horizon={}",
            self.deleted, self.deferred, self.retained_versions, self.horizon
        )
    }
}

struct StoredVersion {
    seq: u64,
    committed_at_ms: i64,
    tombstone: bool,
}

struct KeyVersions {
    key: Tuple,
    versions: Vec<StoredVersion>,
}

impl KeyVersions {
    /// Sequence numbers of the versions eligible for removal, oldest first.
    ///
    /// A superseded version qualifies when the version replacing it is at
    /// or below the horizon and either old enough or the store is over its
    /// version budget. A trailing tombstone qualifies the same way, but only
    /// together with every older version of its key.
    fn eligible(&self, policy: &GcPolicy, horizon: u64, now_ms: i64, over_budget: bool) -> Vec<u64> {
        let stale = |v: &StoredVersion| {
            over_budget
                || u64::try_from(now_ms.saturating_sub(v.committed_at_ms)).unwrap_or(0)
                    >= policy.stale_transaction_threshold_ms
        };

        let mut eligible = Vec::new();
        for pair in self.versions.windows(2) {
            let (old, newer) = (&pair[0], &pair[1]);
            if newer.seq > horizon || !stale(newer) {
                break;
            }
            eligible.push(old.seq);
        }

        if let Some(last) = self.versions.last()
            && last.tombstone
            && last.seq <= horizon
            && stale(last)
            && eligible.len() + 1 == self.versions.len()
        {
            eligible.push(last.seq);
        }
        eligible
    }
}

fn stored_version<V>(entry: Entry<MvccRecord<V>>) -> Option<(Tuple, StoredVersion)> {
    let (key, seq) = parse_version_key(&entry.key)?;
    match entry.value {
        MvccRecord::Version {
            value,
            committed_at_ms,
        } => Some((
            key,
            StoredVersion {
                seq,
                committed_at_ms,
                tombstone: value.is_none(),
            },
        )),
        _ => None,
    }
}

/// Walk the version namespace one key at a time, collecting the keys of
/// eligible versions. Stops at the first key boundary after more than
/// `limit` records were found.
async fn eligible_versions<V, H>(
    btx: &H,
    policy: &GcPolicy,
    horizon: u64,
    now_ms: i64,
    over_budget: bool,
    limit: usize,
) -> Result<Vec<Tuple>>
where
    V: Send + Sync + 'static,
    H: Transaction<MvccRecord<V>> + ?Sized,
{
    let mut doomed = Vec::new();
    let mut current: Option<KeyVersions> = None;
    let mut scan = btx.query(Condition::Gt(version_namespace()));
    loop {
        let next = match scan.next().await.transpose()? {
            Some(entry) => stored_version(entry),
            None => None,
        };
        match next {
            Some((key, version)) if current.as_ref().is_some_and(|g| g.key == key) => {
                if let Some(group) = current.as_mut() {
                    group.versions.push(version);
                }
            }
            next => {
                if let Some(group) = current.take() {
                    for seq in group.eligible(policy, horizon, now_ms, over_budget) {
                        doomed.push(version_key(&group.key, seq));
                    }
                }
                match next {
                    Some((key, version)) if doomed.len() <= limit => {
                        current = Some(KeyVersions {
                            key,
                            versions: vec![version],
                        });
                    }
                    _ => break,
                }
            }
        }
    }
    Ok(doomed)
}

async fn eligible_log<V, H>(btx: &H, horizon: u64, limit: usize) -> Result<Vec<Tuple>>
where
    V: Send + Sync + 'static,
    H: Transaction<MvccRecord<V>> + ?Sized,
{
    let mut keys = Vec::new();
    let mut scan = btx.query(Condition::Gt(log_namespace()));
    while keys.len() < limit {
        let Some(entry) = scan.next().await.transpose()? else {
            break;
        };
        match parse_log_key(&entry.key) {
            Some(seq) if seq <= horizon => keys.push(entry.key),
            _ => break,
        }
    }
    Ok(keys)
}

/// Run one pass against a base transaction, deleting at most
/// `policy.max_delete_batch_size` records.
pub(crate) async fn collect<V, H>(
    btx: &H,
    policy: &GcPolicy,
    horizon: u64,
    now_ms: i64,
) -> Result<GcReport>
where
    V: Send + Sync + 'static,
    H: Transaction<MvccRecord<V>> + ?Sized,
{
    let head = read_head::<V, _>(btx).await?;
    let over_budget = head.versions > policy.transaction_threshold_versions as u64;
    let budget = policy.max_delete_batch_size;

    let mut doomed =
        eligible_versions::<V, _>(btx, policy, horizon, now_ms, over_budget, budget).await?;
    let version_count = doomed.len();
    let room = budget.saturating_add(1).saturating_sub(doomed.len());
    if room > 0 {
        doomed.extend(eligible_log::<V, _>(btx, horizon, room).await?);
    }

    let deferred = doomed.len().saturating_sub(budget);
    doomed.truncate(budget);
    for key in &doomed {
        btx.delete(key).await?;
    }

    let deleted_versions = doomed.len().min(version_count) as u64;
    let head = HeadState {
        versions: head.versions.saturating_sub(deleted_versions),
        ..head
    };
    if deleted_versions > 0 {
        btx.put(head_key(), head.record()).await?;
    }

    Ok(GcReport {
        deleted: doomed.len(),
        deferred,
        retained_versions: head.versions as usize,
        horizon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    fn versions(spec: &[(u64, i64, bool)]) -> KeyVersions {
        KeyVersions {
            key: tuple!["k"],
            versions: spec
                .iter()
                .map(|&(seq, committed_at_ms, tombstone)| StoredVersion {
                    seq,
                    committed_at_ms,
                    tombstone,
                })
                .collect(),
        }
    }

    fn policy(stale_ms: u64) -> GcPolicy {
        GcPolicy::default().stale_after(std::time::Duration::from_millis(stale_ms))
    }

    #[test]
    fn test_superseded_versions_need_visible_successor() {
        let group = versions(&[(1, 0, false), (2, 0, false), (5, 0, false)]);
        assert_eq!(group.eligible(&policy(0), 4, 100, false), vec![1]);
        assert_eq!(group.eligible(&policy(0), 5, 100, false), vec![1, 2]);
    }

    #[test]
    fn test_age_or_budget_makes_versions_stale() {
        let group = versions(&[(1, 0, false), (2, 90, false)]);
        assert!(group.eligible(&policy(50), 2, 100, false).is_empty());
        assert_eq!(group.eligible(&policy(50), 2, 100, true), vec![1]);
        assert_eq!(group.eligible(&policy(10), 2, 100, false), vec![1]);
    }

    #[test]
    fn test_unbounded_age_threshold_never_stale() {
        let never = GcPolicy::default().stale_after(std::time::Duration::from_millis(u64::MAX));
        assert_eq!(never.stale_transaction_threshold_ms, u64::MAX);
        let group = versions(&[(1, 0, false), (2, 0, false)]);
        assert!(group.eligible(&never, 2, i64::MAX, false).is_empty());
        assert_eq!(group.eligible(&never, 2, i64::MAX, true), vec![1]);
    }

    #[test]
    fn test_tombstone_goes_with_its_history() {
        let group = versions(&[(1, 0, false), (2, 0, true)]);
        assert_eq!(group.eligible(&policy(0), 2, 100, false), vec![1, 2]);
        assert_eq!(group.eligible(&policy(0), 1, 100, false), Vec::<u64>::new());

        let live = versions(&[(1, 0, false), (2, 0, false)]);
        assert_eq!(live.eligible(&policy(0), 2, 100, false), vec![1]);
    }
}
