use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

use crate::core::{Result, StoreError};

/// Garbage collection settings for superseded versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GcPolicy {
    /// Run a pass after every n-th writing commit.
    pub every_nth_call: u64,

    /// A superseded version becomes collectable once the version replacing
    /// it is at least this old.
    pub stale_transaction_threshold_ms: u64,

    /// Superseded versions become collectable regardless of age while more
    /// than this many versions are retained.
    pub transaction_threshold_versions: usize,

    /// Upper bound on records deleted by one pass.
    pub max_delete_batch_size: usize,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            every_nth_call: 100,
            stale_transaction_threshold_ms: 60_000,
            transaction_threshold_versions: 10_000,
            max_delete_batch_size: 1_000,
        }
    }
}

impl GcPolicy {
    pub fn every_nth_call(mut self, n: u64) -> Self {
        self.every_nth_call = n;
        self
    }

    pub fn stale_after(mut self, threshold: Duration) -> Self {
        self.stale_transaction_threshold_ms =
            u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn version_threshold(mut self, versions: usize) -> Self {
        self.transaction_threshold_versions = versions;
        self
    }

    pub fn max_delete_batch_size(mut self, size: usize) -> Self {
        self.max_delete_batch_size = size;
        self
    }
}

/// Exponential backoff between conflict retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryBackoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_ms: 1,
            max_ms: 20,
        }
    }
}

impl RetryBackoff {
    pub fn none() -> Self {
        Self {
            base_ms: 0,
            max_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        if self.base_ms == 0 {
            return 0;
        }
        let max = self.max_ms.max(self.base_ms);
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        self.base_ms.saturating_mul(factor).min(max)
    }
}

/// Construction-time configuration of an [`MvccStore`](super::MvccStore).
///
/// ```
/// use tuplekv::{GcPolicy, MvccConfig};
///
/// let config = MvccConfig::new()
///     .conflict_retry_count(5)
///     .gc(GcPolicy::default().every_nth_call(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MvccConfig {
    /// Retries after the first attempt; a transaction runs at most
    /// `conflict_retry_count + 1` times.
    pub conflict_retry_count: usize,

    /// `None` disables garbage collection. Serialized as `false`.
    #[serde(serialize_with = "serialize_gc", deserialize_with = "deserialize_gc")]
    pub gc: Option<GcPolicy>,

    pub retry_backoff: RetryBackoff,
}

impl Default for MvccConfig {
    fn default() -> Self {
        Self {
            conflict_retry_count: 10,
            gc: Some(GcPolicy::default()),
            retry_backoff: RetryBackoff::default(),
        }
    }
}

impl MvccConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conflict_retry_count(mut self, count: usize) -> Self {
        self.conflict_retry_count = count;
        self
    }

    pub fn gc(mut self, policy: GcPolicy) -> Self {
        self.gc = Some(policy);
        self
    }

    pub fn without_gc(mut self) -> Self {
        self.gc = None;
        self
    }

    pub fn retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Parse a JSON document such as
    /// `{"conflictRetryCount": 3, "gc": false}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(gc) = &self.gc {
            if gc.every_nth_call == 0 {
                return Err(StoreError::InvalidConfig(
                    "gc.everyNthCall must be at least 1".into(),
                ));
            }
            if gc.max_delete_batch_size == 0 {
                return Err(StoreError::InvalidConfig(
                    "gc.maxDeleteBatchSize must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GcSetting {
    Toggle(bool),
    Policy(GcPolicy),
}

fn deserialize_gc<'de, D>(deserializer: D) -> std::result::Result<Option<GcPolicy>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match GcSetting::deserialize(deserializer)? {
        GcSetting::Toggle(false) => None,
        GcSetting::Toggle(true) => Some(GcPolicy::default()),
        GcSetting::Policy(policy) => Some(policy),
    })
}

fn serialize_gc<S>(gc: &Option<GcPolicy>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match gc {
        Some(policy) => policy.serialize(serializer),
        None => serializer.serialize_bool(false),
    }
}
