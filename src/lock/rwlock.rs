use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::core::{Result, StoreError};

/// Asynchronous reader/writer lock with FIFO waiter queues.
///
/// Any number of readers may hold the lock together as long as no writer
/// holds it or waits for it; a writer holds it alone. When a writer
/// releases, every queued reader is admitted as one batch before the next
/// writer; when the last reader releases, exactly one queued writer is
/// admitted.
///
/// Waiters are handed an already-armed guard through a oneshot channel, so a
/// waiter that is cancelled after admission drops the guard and releases the
/// lock instead of leaking it.
#[derive(Clone, Default)]
pub struct ReadWriteLock {
    state: Arc<Mutex<LockState>>,
}

#[derive(Default)]
struct LockState {
    readers: usize,
    writer: bool,
    read_queue: VecDeque<oneshot::Sender<ReadGuard>>,
    write_queue: VecDeque<oneshot::Sender<WriteGuard>>,
}

/// Point-in-time view of the lock, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    pub active_readers: usize,
    pub writer_active: bool,
    pub queued_readers: usize,
    pub queued_writers: usize,
}

impl ReadWriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        // Every critical section below leaves the counters consistent before
        // anything can panic, so a poisoned state is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire shared access.
    pub async fn read(&self) -> Result<ReadGuard> {
        let waiter = {
            let mut state = self.state();
            state.write_queue.retain(|w| !w.is_closed());
            if !state.writer && state.write_queue.is_empty() {
                // readers stranded behind a cancelled writer go first
                self.admit_readers(&mut state);
                state.readers += 1;
                return Ok(ReadGuard::armed(self.clone()));
            }
            let (tx, rx) = oneshot::channel();
            state.read_queue.push_back(tx);
            rx
        };

        waiter
            .await
            .map_err(|_| StoreError::LockMisuse("read waiter dropped by the lock".into()))
    }

    /// Acquire exclusive access.
    pub async fn write(&self) -> Result<WriteGuard> {
        let waiter = {
            let mut state = self.state();
            if !state.writer && state.readers == 0 {
                state.writer = true;
                return Ok(WriteGuard::armed(self.clone()));
            }
            let (tx, rx) = oneshot::channel();
            state.write_queue.push_back(tx);
            rx
        };

        waiter
            .await
            .map_err(|_| StoreError::LockMisuse("write waiter dropped by the lock".into()))
    }

    /// Run `f` while holding shared access. The lock is released on every
    /// exit path, including errors, panics and cancellation.
    pub async fn run_read<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.read().await?;
        f().await
    }

    /// Run `f` while holding exclusive access.
    pub async fn run_write<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.write().await?;
        f().await
    }

    pub fn stats(&self) -> LockStats {
        let state = self.state();
        LockStats {
            active_readers: state.readers,
            writer_active: state.writer,
            queued_readers: state.read_queue.iter().filter(|w| !w.is_closed()).count(),
            queued_writers: state.write_queue.iter().filter(|w| !w.is_closed()).count(),
        }
    }

    pub(crate) fn release_read(&self) -> Result<()> {
        let mut state = self.state();
        if state.readers == 0 {
            return Err(StoreError::LockMisuse(
                "read release without a matching acquire".into(),
            ));
        }
        state.readers -= 1;
        if state.readers == 0 && !self.admit_writer(&mut state) {
            // Only reachable when every queued writer was cancelled.
            self.admit_readers(&mut state);
        }
        Ok(())
    }

    pub(crate) fn release_write(&self) -> Result<()> {
        let mut state = self.state();
        if !state.writer {
            return Err(StoreError::LockMisuse(
                "write release without a matching acquire".into(),
            ));
        }
        state.writer = false;
        if self.admit_readers(&mut state) == 0 {
            self.admit_writer(&mut state);
        }
        Ok(())
    }

    fn admit_readers(&self, state: &mut LockState) -> usize {
        let mut admitted = 0;
        while let Some(waiter) = state.read_queue.pop_front() {
            state.readers += 1;
            match waiter.send(ReadGuard::armed(self.clone())) {
                Ok(()) => admitted += 1,
                Err(mut guard) => {
                    guard.disarm();
                    state.readers -= 1;
                }
            }
        }
        admitted
    }

    fn admit_writer(&self, state: &mut LockState) -> bool {
        while let Some(waiter) = state.write_queue.pop_front() {
            state.writer = true;
            match waiter.send(WriteGuard::armed(self.clone())) {
                Ok(()) => return true,
                Err(mut guard) => {
                    guard.disarm();
                    state.writer = false;
                }
            }
        }
        false
    }
}

impl fmt::Debug for ReadWriteLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadWriteLock")
            .field("stats", &self.stats())
            .finish()
    }
}

/// RAII guard for shared access.
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadGuard {
    lock: Option<ReadWriteLock>,
}

impl ReadGuard {
    fn armed(lock: ReadWriteLock) -> Self {
        Self { lock: Some(lock) }
    }

    fn disarm(&mut self) {
        self.lock = None;
    }
}

impl fmt::Debug for ReadGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadGuard")
            .field("armed", &self.lock.is_some())
            .finish()
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take()
            && let Err(err) = lock.release_read()
            && !std::thread::panicking()
        {
            panic!("{}", err);
        }
    }
}

/// RAII guard for exclusive access.
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard {
    lock: Option<ReadWriteLock>,
}

impl WriteGuard {
    fn armed(lock: ReadWriteLock) -> Self {
        Self { lock: Some(lock) }
    }

    fn disarm(&mut self) {
        self.lock = None;
    }
}

impl fmt::Debug for WriteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteGuard")
            .field("armed", &self.lock.is_some())
            .finish()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take()
            && let Err(err) = lock.release_write()
            && !std::thread::panicking()
        {
            panic!("{}", err);
        }
    }
}
