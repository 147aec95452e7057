//! Everything needed to run transactions and consume scans.
//!
//! ```
//! use tuplekv::prelude::*;
//! ```

pub use crate::core::{Component, Condition, Direction, Entry, Result, StoreError, Tuple};
pub use crate::facade::{Cell, Counter};
pub use crate::storage::{KvStore, Snapshot, Transaction};
pub use crate::transaction::{MvccConfig, MvccStore};
pub use crate::tuple;
pub use futures::{StreamExt, TryStreamExt};
