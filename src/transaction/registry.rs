use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Tracks the start sequence of every open snapshot and transaction attempt.
///
/// The smallest leased start is the GC horizon: nothing an open reader may
/// still see is older than it.
#[derive(Clone)]
pub(crate) struct ReaderRegistry {
    state: Arc<Mutex<RegistryState>>,
}

struct RegistryState {
    committed: u64,
    leases: BTreeMap<u64, usize>,
}

impl ReaderRegistry {
    pub(crate) fn new(committed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                committed,
                leases: BTreeMap::new(),
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a reader at the latest published sequence.
    pub(crate) fn lease(&self) -> ReaderLease {
        let mut state = self.state();
        let start = state.committed;
        *state.leases.entry(start).or_insert(0) += 1;
        ReaderLease {
            registry: self.clone(),
            start,
        }
    }

    pub(crate) fn publish(&self, seq: u64) {
        let mut state = self.state();
        state.committed = state.committed.max(seq);
    }

    pub(crate) fn committed(&self) -> u64 {
        self.state().committed
    }

    pub(crate) fn horizon(&self) -> u64 {
        let state = self.state();
        state
            .leases
            .keys()
            .next()
            .copied()
            .unwrap_or(state.committed)
    }

    pub(crate) fn open_leases(&self) -> usize {
        self.state().leases.values().sum()
    }

    fn release(&self, start: u64) {
        let mut state = self.state();
        if let Some(count) = state.leases.get_mut(&start) {
            *count -= 1;
            if *count == 0 {
                state.leases.remove(&start);
            }
        }
    }
}

/// An open reader's claim on its start sequence; released on drop.
pub(crate) struct ReaderLease {
    registry: ReaderRegistry,
    start: u64,
}

impl ReaderLease {
    pub(crate) fn start(&self) -> u64 {
        self.start
    }

    /// Second claim on the same start, for a scan that may outlive this one.
    pub(crate) fn renew(&self) -> ReaderLease {
        let mut state = self.registry.state();
        *state.leases.entry(self.start).or_insert(0) += 1;
        ReaderLease {
            registry: self.registry.clone(),
            start: self.start,
        }
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        self.registry.release(self.start);
    }
}
