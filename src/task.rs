//! Async execution and context-aware waiting.
//!
//! [`spawn`] couples a fresh fiber with a fresh promise: the fiber body runs
//! the callable, the promise settles with its result. The two lifetimes are
//! coupled only through the resolver closure — the promise may outlive the
//! fiber, and the fiber terminates as soon as the body returns.
//!
//! [`wait`] suspends the current fiber until a promise settles; outside any
//! fiber it falls back to the blocking wait, which drives the event loop.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::promise::Promise;
use crate::runtime::context;
use crate::runtime::event_loop::LoopHandle;
use crate::runtime::fiber::Fiber;
use crate::types::Reason;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Runs `body` in a fresh fiber on the current loop; returns the promise of
/// its result.
///
/// The promise resolves with the body's `Ok` value, rejects with its `Err`,
/// and rejects with a `Panic`-kind error if the body panics.
pub fn spawn<T, F>(body: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    spawn_on(context::current_loop(), body)
}

/// Runs `body` in a fresh fiber on an explicit loop.
pub(crate) fn spawn_on<T, F>(lp: LoopHandle, body: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (promise, resolver) = Promise::deferred_on(lp.clone());

    let settle = resolver.clone();
    let fiber = Fiber::spawn(
        lp.clone(),
        Box::new(move || {
            match std::panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(Ok(value)) => settle.resolve(value),
                Ok(Err(e)) => settle.reject(e),
                Err(payload) => settle.reject(Error::from_panic(payload.as_ref())),
            }
        }),
    );

    match fiber {
        Ok(fiber) => lp.add_fiber(fiber),
        Err(e) => resolver.reject(e),
    }
    promise
}

/// Wraps a callable into a promise-returning function.
///
/// Each invocation spawns a fresh fiber, so calls run concurrently:
///
/// ```ignore
/// let fetch = spawn_fn(|id: u32| Ok(id * 2));
/// let a = fetch(1);
/// let b = fetch(2);
/// ```
pub fn spawn_fn<A, T, F>(body: F) -> impl Fn(A) -> Promise<T>
where
    A: Send + 'static,
    T: Clone + Send + 'static,
    F: Fn(A) -> Result<T> + Clone + Send + 'static,
{
    move |arg| {
        let body = body.clone();
        spawn(move || body(arg))
    }
}

/// What a suspended awaiter observed when its promise settled.
enum WaitOutcome<T> {
    Value(T),
    Failed(Reason),
}

/// Suspends the current fiber until `promise` settles, then returns its
/// value or error.
///
/// Outside any fiber this drives the event loop instead of suspending
/// (see [`Promise::wait_blocking`]).
///
/// # Errors
///
/// - the promise's rejection reason, normalized to an [`Error`]
/// - [`crate::ErrorKind::Cancelled`] if the promise is (or becomes) cancelled
pub fn wait<T: Clone + Send + 'static>(promise: &Promise<T>) -> Result<T> {
    if !context::in_fiber() {
        return promise.wait_blocking();
    }
    if promise.is_cancelled() {
        return Err(Error::cancelled());
    }
    if promise.is_settled() {
        return promise.outcome();
    }

    let fiber = context::ensure_in_fiber("wait")?;
    // Wake through the fiber's own loop: that is the loop that owns it.
    let lp = context::current_loop();
    let slot: Arc<Mutex<Option<WaitOutcome<T>>>> = Arc::new(Mutex::new(None));

    // Each continuation stores the outcome (if any) and schedules this fiber
    // back onto the loop. The continuation holds only the fiber id — not the
    // fiber — so a long-lived promise does not pin fiber resources.
    let store = Arc::clone(&slot);
    let wake = lp.clone();
    let id = fiber.id();
    promise.on_fulfilled(move |value| {
        *store.lock() = Some(WaitOutcome::Value(value));
        wake.schedule_fiber(id);
    });

    let store = Arc::clone(&slot);
    let wake = lp.clone();
    promise.on_rejected(move |reason| {
        *store.lock() = Some(WaitOutcome::Failed(reason));
        wake.schedule_fiber(id);
    });

    let wake = lp;
    promise.on_cancel(move || {
        wake.schedule_fiber(id);
    });

    context::suspend_current()?;

    if promise.is_cancelled() {
        return Err(Error::cancelled());
    }
    let outcome = slot.lock().take();
    match outcome {
        Some(WaitOutcome::Value(value)) => Ok(value),
        Some(WaitOutcome::Failed(reason)) => Err(reason.into_error()),
        None => Err(Error::new(crate::ErrorKind::Internal)
            .with_context("fiber resumed without a settlement")),
    }
}

/// Like [`wait`], but tracks the promise with a cancellation token first.
///
/// Cancelling the token's source cancels the promise, which wakes this
/// awaiter with a `Cancelled` error.
pub fn wait_with<T: Clone + Send + 'static>(
    promise: &Promise<T>,
    token: &CancelToken,
) -> Result<T> {
    let tracked = token.track(promise);
    wait(&tracked)
}
