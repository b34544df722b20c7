//! Timeout combinator.
//!
//! Races an operand against an internal delay that rejects with a `Timeout`
//! error. The losing operand is *not* cancelled by `timeout` itself; callers
//! who need resource cleanup couple the operand with a cancellation token.

use crate::error::{Error, Result};
use crate::promise::Promise;
use crate::time::delay_on;
use std::time::Duration;

/// Returns a promise that adopts `promise`, or rejects with a `Timeout`
/// error if `duration` elapses first.
///
/// The internal timer is cancelled as soon as the operand settles, so a
/// finished timeout leaves nothing behind on the loop.
///
/// # Errors
///
/// A zero `duration` is an `InvalidArgument` error at call time, not a
/// rejection.
pub fn timeout<T: Clone + Send + 'static>(
    promise: &Promise<T>,
    duration: Duration,
) -> Result<Promise<T>> {
    if duration.is_zero() {
        return Err(Error::invalid_argument(
            "timeout duration must be positive",
        ));
    }

    let (derived, resolver) = Promise::deferred_on(promise.loop_handle());
    let timer = delay_on(promise.loop_handle(), duration);

    let on_elapsed = resolver.clone();
    timer.on_fulfilled(move |()| {
        on_elapsed.reject(Error::timeout(duration));
    });

    let stop_timer = timer.clone();
    let on_ok = resolver.clone();
    promise.on_fulfilled(move |value| {
        stop_timer.cancel();
        on_ok.resolve(value);
    });

    let stop_timer = timer.clone();
    let on_err = resolver.clone();
    promise.on_rejected(move |reason| {
        stop_timer.cancel();
        on_err.reject(reason);
    });

    promise.on_cancel(move || {
        timer.cancel();
        resolver.cancel();
    });

    Ok(derived)
}
