// ============================================================================
// MVCC Transaction Module
// ============================================================================
//
// Optimistic multi-version concurrency control over any serialized base
// store.
//
// - Attempts read at a fixed start sequence and buffer their writes.
// - Commit validates the read-set (point keys and scanned ranges) against the
//   commit log since that start, then appends versions in one short base
//   write transaction.
// - Conflicting attempts are re-run from scratch with backoff.
// - Superseded versions no open reader can see are collected periodically.
//
// ============================================================================

pub mod config;
pub mod gc;
pub mod handle;
pub mod manager;
pub mod record;
pub(crate) mod registry;
pub mod state;

pub use config::{GcPolicy, MvccConfig, RetryBackoff};
pub use gc::GcReport;
pub use handle::{MvccSnapshot, MvccTransaction};
pub use manager::{MvccStats, MvccStore};
pub use record::MvccRecord;
pub use state::{ReadSet, TransactionId, TransactionState, WriteSet};
