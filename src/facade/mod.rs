//! Small typed helpers that live inside a transaction.
//!
//! Neither helper adds any concurrency control of its own: a [`Cell`] or
//! [`Counter`] is exactly as safe as the transaction it is used in.

pub mod cell;
pub mod counter;

pub use cell::Cell;
pub use counter::Counter;
