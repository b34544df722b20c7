//! Time-based primitives.
//!
//! [`delay`] is the cancellable timer promise; [`sleep`] is the fiber-level
//! convenience that waits on it.

use crate::promise::Promise;
use crate::runtime::context;
use crate::task;
use std::time::Duration;

/// Returns a cancellable promise that resolves after `duration`.
///
/// A zero duration resolves on the next microtask tick. Cancelling the
/// promise removes the underlying event-loop timer, so no callback fires.
///
/// The promise resolves no earlier than `duration` after construction
/// (monotonic clock).
#[must_use]
pub fn delay(duration: Duration) -> Promise<()> {
    delay_on(context::current_loop(), duration)
}

/// [`delay`] bound to an explicit loop.
pub(crate) fn delay_on(lp: crate::runtime::LoopHandle, duration: Duration) -> Promise<()> {
    let (promise, resolver) = Promise::deferred_on(lp.clone());

    if duration.is_zero() {
        lp.next_tick(move || resolver.resolve(()));
        return promise;
    }

    let timer = lp.add_timer(duration, move || resolver.resolve(()));
    promise.set_cancel_hook(move || {
        lp.cancel_timer(timer);
    });
    promise
}

/// Suspends the current fiber for `duration`.
///
/// Equivalent to `wait(&delay(duration))`: outside a fiber it drives the
/// event loop instead of suspending.
///
/// # Errors
///
/// Returns `Cancelled` if the underlying delay promise is cancelled.
pub fn sleep(duration: Duration) -> crate::Result<()> {
    task::wait(&delay(duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;
    use crate::task::spawn;
    use crate::test_utils::init_test_logging;
    use crate::ErrorKind;
    use std::time::Instant;

    #[test]
    fn zero_delay_resolves_on_next_tick() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let p = delay(Duration::ZERO);
        assert!(p.is_pending());
        lp.run().expect("run");
        assert_eq!(p.value(), Some(()));
    }

    #[test]
    fn delay_resolves_no_earlier_than_requested() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let started = Instant::now();
        let p = delay(Duration::from_millis(20));
        lp.run().expect("run");
        assert!(p.is_fulfilled());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancelled_delay_removes_its_timer() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let p = delay(Duration::from_millis(10));
        p.cancel();
        assert!(p.is_cancelled());
        assert!(lp.is_idle());

        let started = Instant::now();
        lp.run().expect("run");
        // The loop had nothing left to wait for.
        assert!(started.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn sleep_suspends_a_fiber() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let started = Instant::now();
        let p = spawn(|| {
            sleep(Duration::from_millis(15))?;
            Ok("woke")
        });
        lp.run().expect("run");
        assert_eq!(p.value(), Some("woke"));
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn sleeping_on_cancelled_delay_fails() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let timer = delay(Duration::from_secs(5));
        let victim = timer.clone();
        let p = spawn(move || task::wait(&victim));
        lp.next_tick(move || timer.cancel());

        let started = Instant::now();
        lp.run().expect("run");
        let err = p.reason().expect("reason").into_error();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        // The awaiter was woken by cancellation, not by the 5s timer.
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
