pub mod rwlock;

pub use rwlock::{LockStats, ReadGuard, ReadWriteLock, WriteGuard};
