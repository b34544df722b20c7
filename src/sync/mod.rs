//! Synchronization primitives.
//!
//! - [`mutex`]: the FIFO async lock

pub mod mutex;

pub use mutex::{Mutex, MutexGuard};
