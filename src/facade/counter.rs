use std::fmt::Display;

use super::cell::Cell;
use crate::core::{Result, StoreError, Tuple};
use crate::storage::{Snapshot, Transaction};

/// An integer [`Cell`] with read-modify-write increments.
///
/// An increment reads the key, so two concurrent increments of the same
/// counter always conflict and one of them is retried.
#[derive(Debug, Clone)]
pub struct Counter {
    cell: Cell<i64>,
}

impl Counter {
    /// Counter starting at zero.
    pub fn new(key: Tuple) -> Self {
        Self::with_initial(key, 0)
    }

    pub fn with_initial(key: Tuple, initial: i64) -> Self {
        Self {
            cell: Cell::new(key, initial),
        }
    }

    pub fn key(&self) -> &Tuple {
        self.cell.key()
    }

    pub async fn get<V, H>(&self, handle: &H) -> Result<i64>
    where
        V: Send + Sync + 'static,
        H: Snapshot<V> + ?Sized,
        i64: TryFrom<V>,
        <i64 as TryFrom<V>>::Error: Display,
    {
        self.cell.get::<V, H>(handle).await
    }

    pub async fn set<V, H>(&self, tx: &H, value: i64) -> Result<()>
    where
        V: From<i64> + Send + Sync + 'static,
        H: Transaction<V> + ?Sized,
    {
        self.cell.set::<V, H>(tx, value).await
    }

    pub async fn increment<V, H>(&self, tx: &H) -> Result<i64>
    where
        V: From<i64> + Send + Sync + 'static,
        H: Transaction<V> + ?Sized,
        i64: TryFrom<V>,
        <i64 as TryFrom<V>>::Error: Display,
    {
        self.increment_by::<V, H>(tx, 1).await
    }

    /// Add `delta` and return the new value.
    pub async fn increment_by<V, H>(&self, tx: &H, delta: i64) -> Result<i64>
    where
        V: From<i64> + Send + Sync + 'static,
        H: Transaction<V> + ?Sized,
        i64: TryFrom<V>,
        <i64 as TryFrom<V>>::Error: Display,
    {
        let current = self.cell.get::<V, H>(tx).await?;
        let next = current.checked_add(delta).ok_or_else(|| {
            StoreError::Internal(format!(
                "counter {} overflows adding {} to {}",
                self.cell.key(),
                delta,
                current
            ))
        })?;
        self.cell.set::<V, H>(tx, next).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvStore, MemoryStore};
    use crate::tuple;

    #[tokio::test]
    async fn test_increment_from_initial() {
        let store = MemoryStore::<i64>::new();
        let counter = Counter::with_initial(tuple!["visits"], 10);

        let value = store
            .transact(|tx| {
                let counter = counter.clone();
                async move {
                    counter.increment(&tx).await?;
                    counter.increment_by(&tx, 5).await
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 16);

        let stored = store
            .snapshot(|s| async move { counter.get(&s).await })
            .await
            .unwrap();
        assert_eq!(stored, 16);
    }

    #[tokio::test]
    async fn test_overflow_is_rejected() {
        let store = MemoryStore::<i64>::new();
        let counter = Counter::with_initial(tuple!["c"], i64::MAX);
        let err = store
            .transact(|tx| {
                let counter = counter.clone();
                async move { counter.increment(&tx).await }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Internal(_)));
        assert!(store.is_empty().unwrap());
    }
}
