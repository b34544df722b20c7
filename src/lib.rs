//! Filament: a fiber-based structured concurrency runtime with
//! eagerly-evaluated promises.
//!
//! # Overview
//!
//! Filament multiplexes stackful coroutines ("fibers") on a single-threaded
//! cooperative event loop. Work is expressed as eager promises: [`spawn`]
//! couples a fresh fiber with a fresh [`Promise`], [`wait`] suspends the
//! current fiber until a promise settles, and the combinators compose
//! promises while preserving input key order.
//!
//! Exactly one fiber runs at any moment. Fibers are backed by OS threads
//! parked on condition variables, with the turn handed off by the loop —
//! ordinary memory accesses between suspension points are free of data races
//! with other fibers.
//!
//! # Core Guarantees
//!
//! - **One terminal state**: a promise settles at most once; the first
//!   terminal transition wins and cancelled is terminal
//! - **Ordered continuations**: callbacks of a single promise fire at most
//!   once, in registration order
//! - **Key preservation**: combinator results carry the input key set in
//!   input iteration order
//! - **Bounded dispatch**: `concurrent(tasks, k)` keeps at most `k` tasks in
//!   flight
//! - **FIFO fairness**: mutex waiters acquire in arrival order; cancelled
//!   waiters are skipped
//! - **Cooperative cancellation**: cancelling wakes awaiters, which observe
//!   the cancelled state and fail with a `Cancelled` error
//!
//! # Module Structure
//!
//! - [`runtime`]: event loop, fibers, context, configuration
//! - [`promise`]: the promise state machine and resolver pair
//! - [`task`]: `spawn` / `wait` — async execution and context-aware waiting
//! - [`time`]: cancellable delays and fiber sleep
//! - [`combinator`]: `all`, `all_settled`, `race`, `any`, `timeout`,
//!   `concurrent`, `batch`, and the `*_settled` variants
//! - [`sync`]: the FIFO async mutex
//! - [`cancel`]: cancellation sources, tokens, and registrations
//! - [`observability`]: loop metrics
//! - [`types`]: identifiers, reasons, settlement records, keyed maps
//! - [`error`]: error types
//!
//! # Example
//!
//! ```
//! use filament::{spawn, EventLoop};
//! use std::time::Duration;
//!
//! let lp = EventLoop::new();
//! let _guard = lp.enter();
//!
//! let p = spawn(|| {
//!     filament::time::sleep(Duration::from_millis(5))?;
//!     Ok("done")
//! });
//!
//! lp.run().expect("loop runs to idle");
//! assert_eq!(p.value(), Some("done"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod cancel;
pub mod combinator;
pub mod error;
pub mod observability;
pub mod promise;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod test_utils;
pub mod time;
pub mod types;

// Re-exports for convenient access to core types.
pub use cancel::{CancelSource, CancelToken, Registration};
pub use combinator::{
    all, all_settled, any, batch, batch_settled, concurrent, concurrent_default,
    concurrent_settled, race, timeout, Task, TaskSet, TaskValue,
};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use promise::{Promise, Resolver};
pub use runtime::{
    current_fiber, default_loop, ensure_in_fiber, in_fiber, EventLoop, FiberHandle, LoopConfig,
    LoopHandle,
};
pub use sync::{Mutex, MutexGuard};
pub use task::{spawn, spawn_fn, wait, wait_with};
pub use time::{delay, sleep};
pub use types::{FiberId, PromiseId, Reason, Settlement, TaskKey, TaskMap, Time, TimerId};
