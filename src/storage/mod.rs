pub mod contracts;
pub mod memory;

pub use contracts::{EntryStream, KvStore, Snapshot, Transaction};
pub use memory::{MemorySnapshot, MemoryStore, MemoryTransaction};
