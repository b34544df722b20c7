//! Promise combinators.
//!
//! - [`set`]: the keyed, ordered input collection ([`TaskSet`])
//! - [`collect`]: `all` and `all_settled`
//! - [`race`]: `race` and `any`
//! - [`timeout`]: race an operand against a rejection timer
//! - [`concurrent`]: capped dispatch pools and sequential batches

pub mod collect;
pub mod concurrent;
pub mod race;
pub mod set;
pub mod timeout;

pub use collect::{all, all_settled};
pub use concurrent::{
    batch, batch_settled, concurrent, concurrent_default, concurrent_settled,
};
pub use race::{any, race};
pub use set::{Task, TaskSet, TaskValue};
pub use timeout::timeout;
