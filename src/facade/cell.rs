use std::fmt::Display;

use crate::core::{Result, StoreError, Tuple};
use crate::storage::{Snapshot, Transaction};

/// A single value stored at a fixed key, read back as `initial` while the key
/// is absent.
///
/// Values go through the store's value type `V` via `V: From<T>` on write and
/// `T: TryFrom<V>` on read.
#[derive(Debug, Clone)]
pub struct Cell<T> {
    key: Tuple,
    initial: T,
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync,
{
    pub fn new(key: Tuple, initial: T) -> Self {
        Self { key, initial }
    }

    pub fn key(&self) -> &Tuple {
        &self.key
    }

    pub fn initial(&self) -> &T {
        &self.initial
    }

    pub async fn get<V, H>(&self, handle: &H) -> Result<T>
    where
        V: Send + Sync + 'static,
        H: Snapshot<V> + ?Sized,
        T: TryFrom<V>,
        <T as TryFrom<V>>::Error: Display,
    {
        match handle.get(&self.key).await? {
            Some(stored) => T::try_from(stored).map_err(|e| {
                StoreError::Decode(format!("cell {}: {}", self.key, e))
            }),
            None => Ok(self.initial.clone()),
        }
    }

    pub async fn set<V, H>(&self, tx: &H, value: T) -> Result<()>
    where
        V: From<T> + Send + Sync + 'static,
        H: Transaction<V> + ?Sized,
    {
        tx.put(self.key.clone(), V::from(value)).await
    }

    /// Remove the stored value; later reads return the initial value again.
    pub async fn clear<V, H>(&self, tx: &H) -> Result<()>
    where
        V: Send + Sync + 'static,
        H: Transaction<V> + ?Sized,
    {
        tx.delete(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Component;
    use crate::storage::{KvStore, MemoryStore};
    use crate::tuple;

    #[tokio::test]
    async fn test_absent_cell_reads_initial() {
        let store = MemoryStore::<Component>::new();
        let cell = Cell::new(tuple!["settings", "title"], String::from("untitled"));

        let title = store
            .snapshot(|s| {
                let cell = cell.clone();
                async move { cell.get(&s).await }
            })
            .await
            .unwrap();
        assert_eq!(title, "untitled");
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::<Component>::new();
        let cell = Cell::new(tuple!["flag"], false);

        let seen = store
            .transact(|tx| {
                let cell = cell.clone();
                async move {
                    cell.set(&tx, true).await?;
                    cell.get(&tx).await
                }
            })
            .await
            .unwrap();
        assert!(seen);
    }

    #[tokio::test]
    async fn test_wrong_type_is_decode_error() {
        let store = MemoryStore::<Component>::new();
        store
            .transact(|tx| async move { tx.put(tuple!["n"], Component::from("seven")).await })
            .await
            .unwrap();

        let cell = Cell::new(tuple!["n"], 0i64);
        let err = store
            .snapshot(|s| async move { cell.get(&s).await })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
