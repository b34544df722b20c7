//! Core types for the Filament runtime.
//!
//! - [`id`]: identifier types (`FiberId`, `PromiseId`, `TimerId`, `Time`)
//! - [`reason`]: normalized rejection reasons
//! - [`settlement`]: non-throwing task outcome records
//! - [`key`]: order-preserving keyed maps for combinator inputs and results

pub mod id;
pub mod key;
pub mod reason;
pub mod settlement;

pub use id::{FiberId, PromiseId, Time, TimerId};
pub use key::{TaskKey, TaskMap};
pub use reason::Reason;
pub use settlement::Settlement;
