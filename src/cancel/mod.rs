//! Cancellation sources, tokens, and registrations.
//!
//! A [`CancelSource`] owns cancellation authority; its [`CancelToken`]s
//! observe it. Tokens track promises — tracked promises are auto-untracked
//! when they settle — and carry `on_cancel` callbacks.
//!
//! Cancelling a source, exactly once:
//!
//! 1. marks the token cancelled;
//! 2. cancels every tracked promise, in insertion order;
//! 3. fires `on_cancel` callbacks, in registration order;
//! 4. clears the tracked set and the callback list.
//!
//! Callbacks registered after cancellation run synchronously and return a
//! pre-disposed [`Registration`].

use crate::error::{Error, Result};
use crate::promise::{Promise, PromiseControl};
use crate::time::delay;
use crate::types::PromiseId;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

struct SourceState {
    cancelled: bool,
    /// Tracked promises, insertion order preserved.
    tracked: Vec<Arc<dyn PromiseControl>>,
    /// Registered callbacks; a disposed slot keeps its id but drops the
    /// callback so registration order survives disposal.
    callbacks: Vec<(u64, Option<CancelCallback>)>,
    next_callback_id: u64,
    /// The delay promise driving a scheduled auto-cancel, if any.
    auto_cancel: Option<Promise<()>>,
}

struct SourceInner {
    state: Mutex<SourceState>,
}

/// Cancels every tracked promise, then fires callbacks. Idempotent.
fn cancel_inner(inner: &Arc<SourceInner>) {
    let (auto, tracked, callbacks) = {
        let mut state = inner.state.lock();
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        (
            state.auto_cancel.take(),
            std::mem::take(&mut state.tracked),
            std::mem::take(&mut state.callbacks),
        )
    };
    tracing::debug!(tracked = tracked.len(), callbacks = callbacks.len(), "source cancelled");
    if let Some(timer) = auto {
        timer.cancel();
    }
    for promise in tracked {
        promise.cancel();
    }
    for (_, callback) in callbacks {
        if let Some(callback) = callback {
            callback();
        }
    }
}

fn untrack_inner(inner: &Arc<SourceInner>, id: PromiseId) {
    inner
        .state
        .lock()
        .tracked
        .retain(|control| control.id() != id);
}

/// The owner of cancellation authority.
pub struct CancelSource {
    inner: Arc<SourceInner>,
}

impl CancelSource {
    /// Creates a source that never cancels on its own.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SourceInner {
                state: Mutex::new(SourceState {
                    cancelled: false,
                    tracked: Vec::new(),
                    callbacks: Vec::new(),
                    next_callback_id: 0,
                    auto_cancel: None,
                }),
            }),
        }
    }

    /// Creates a source that cancels automatically after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let source = Self::new();
        source.cancel_after(timeout);
        source
    }

    /// Creates a source that cancels as soon as any input token does.
    ///
    /// If any input token is already cancelled, the new source is cancelled
    /// synchronously before returning.
    #[must_use]
    pub fn linked(tokens: &[CancelToken]) -> Self {
        let source = Self::new();
        for token in tokens {
            let inner = Arc::clone(&source.inner);
            let _registration = token.on_cancel(move || cancel_inner(&inner));
        }
        source
    }

    /// Returns an observing token for this source.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Returns true once this source has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    /// Cancels: tracked promises first (insertion order), then callbacks
    /// (registration order), then both sets are cleared.
    ///
    /// Idempotent; the callback list fires exactly once.
    pub fn cancel(&self) {
        cancel_inner(&self.inner);
    }

    /// Schedules (or reschedules) an automatic cancel after `timeout`.
    ///
    /// Replaces any previously scheduled auto-cancel. No effect if the
    /// source is already cancelled.
    pub fn cancel_after(&self, timeout: Duration) {
        let previous = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                return;
            }
            state.auto_cancel.take()
        };
        if let Some(timer) = previous {
            timer.cancel();
        }

        let timer = delay(timeout);
        let weak = Arc::downgrade(&self.inner);
        timer.on_fulfilled(move |()| {
            if let Some(inner) = weak.upgrade() {
                cancel_inner(&inner);
            }
        });

        let mut state = self.inner.state.lock();
        if state.cancelled {
            drop(state);
            timer.cancel();
        } else {
            state.auto_cancel = Some(timer);
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CancelSource")
            .field("cancelled", &state.cancelled)
            .field("tracked", &state.tracked.len())
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

/// An observer of a [`CancelSource`].
///
/// Cloneable; all clones observe the same source. [`CancelToken::none`]
/// yields the never-cancellable token.
#[derive(Clone)]
pub struct CancelToken {
    /// `None` is the never-cancellable token.
    inner: Option<Arc<SourceInner>>,
}

impl CancelToken {
    /// Returns the never-cancellable token.
    ///
    /// Its `on_cancel` returns a pre-disposed registration and its `track`
    /// is a no-op.
    #[must_use]
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// Returns true once the source has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.state.lock().cancelled)
    }

    /// Fails with a `Cancelled` error if the token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::Cancelled`] once cancelled.
    pub fn throw_if_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::cancelled().with_context("token cancelled"));
        }
        Ok(())
    }

    /// Registers a callback fired on cancellation.
    ///
    /// If the token is already cancelled the callback runs synchronously and
    /// a pre-disposed registration is returned.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) -> Registration {
        let Some(inner) = &self.inner else {
            return Registration::disposed();
        };
        {
            let mut state = inner.state.lock();
            if !state.cancelled {
                let id = state.next_callback_id;
                state.next_callback_id += 1;
                state.callbacks.push((id, Some(Box::new(callback))));
                return Registration {
                    source: Arc::downgrade(inner),
                    id: Some(id),
                };
            }
        }
        callback();
        Registration::disposed()
    }

    /// Tracks a promise: cancelling this token's source cancels it.
    ///
    /// The promise is auto-untracked when it settles. If the token is
    /// already cancelled, the promise is cancelled before returning.
    /// Returns the promise for call-through ergonomics.
    pub fn track<T: Clone + Send + 'static>(&self, promise: &Promise<T>) -> Promise<T> {
        let Some(inner) = &self.inner else {
            return promise.clone();
        };
        let control = promise.control();
        let id = control.id();

        let already_cancelled = {
            let mut state = inner.state.lock();
            if state.cancelled {
                true
            } else {
                state.tracked.push(Arc::clone(&control));
                false
            }
        };
        if already_cancelled {
            control.cancel();
            return promise.clone();
        }

        let weak = Arc::downgrade(inner);
        control.on_settled(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                untrack_inner(&inner, id);
            }
        }));
        promise.clone()
    }

    /// Stops tracking the promise with the given id.
    pub fn untrack(&self, id: PromiseId) {
        if let Some(inner) = &self.inner {
            untrack_inner(inner, id);
        }
    }

    /// Drops all tracked promises without cancelling them.
    pub fn clear_tracked(&self) {
        if let Some(inner) = &self.inner {
            inner.state.lock().tracked.clear();
        }
    }

    /// Returns the number of currently tracked promises.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.state.lock().tracked.len())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancellable", &self.inner.is_some())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A handle to a registered `on_cancel` callback.
///
/// Disposing removes the callback if it has not fired; disposal is
/// idempotent. Dropping a registration does *not* dispose it.
#[derive(Debug)]
pub struct Registration {
    source: Weak<SourceInner>,
    /// `None` once disposed (or pre-disposed).
    id: Option<u64>,
}

impl Registration {
    fn disposed() -> Self {
        Self {
            source: Weak::new(),
            id: None,
        }
    }

    /// Returns true if this registration can no longer be disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.id.is_none()
    }

    /// Removes the callback if still registered. Idempotent.
    pub fn dispose(&mut self) {
        let Some(id) = self.id.take() else { return };
        if let Some(inner) = self.source.upgrade() {
            let mut state = inner.state.lock();
            if let Some(slot) = state.callbacks.iter_mut().find(|(slot_id, _)| *slot_id == id) {
                slot.1 = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancel_is_idempotent_and_fires_callbacks_once() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let source = CancelSource::new();
        let token = source.token();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let _registration = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source.cancel();
        source.cancel();
        assert!(source.is_cancelled());
        assert!(token.is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_fire_in_registration_order_after_tracked_cancels() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let source = CancelSource::new();
        let token = source.token();
        let order = Arc::new(Mutex::new(Vec::new()));

        let (p, _r) = Promise::<i32>::deferred();
        let log = Arc::clone(&order);
        p.on_cancel(move || log.lock().push("tracked promise"));
        token.track(&p);

        let log = Arc::clone(&order);
        let _first = token.on_cancel(move || log.lock().push("first callback"));
        let log = Arc::clone(&order);
        let _second = token.on_cancel(move || log.lock().push("second callback"));

        source.cancel();
        assert_eq!(
            *order.lock(),
            ["tracked promise", "first callback", "second callback"]
        );
        assert_eq!(token.tracked_count(), 0);
    }

    #[test]
    fn late_callback_runs_synchronously_with_disposed_registration() {
        init_test_logging();
        let source = CancelSource::new();
        let token = source.token();
        source.cancel();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let registration = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(registration.is_disposed());
    }

    #[test]
    fn disposed_registration_never_fires() {
        init_test_logging();
        let source = CancelSource::new();
        let token = source.token();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let mut registration = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registration.dispose();
        registration.dispose();
        assert!(registration.is_disposed());

        source.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tracked_promises_auto_untrack_on_settlement() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let source = CancelSource::new();
        let token = source.token();

        let (p, r) = Promise::<i32>::deferred();
        token.track(&p);
        assert_eq!(token.tracked_count(), 1);

        r.resolve(1);
        assert_eq!(token.tracked_count(), 0);

        // Cancelling now has nothing left to cancel.
        source.cancel();
        assert!(p.is_fulfilled());
    }

    #[test]
    fn tracking_on_cancelled_token_cancels_immediately() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let source = CancelSource::new();
        let token = source.token();
        source.cancel();

        let (p, _r) = Promise::<i32>::deferred();
        let returned = token.track(&p);
        assert!(returned.is_cancelled());
        assert_eq!(token.tracked_count(), 0);
    }

    #[test]
    fn none_token_is_inert() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let token = CancelToken::none();
        assert!(!token.is_cancelled());
        token.throw_if_cancelled().expect("never cancelled");

        let registration = token.on_cancel(|| unreachable!("none token never fires"));
        assert!(registration.is_disposed());

        let (p, _r) = Promise::<i32>::deferred();
        token.track(&p);
        assert_eq!(token.tracked_count(), 0);
        assert!(p.is_pending());
    }

    #[test]
    fn throw_if_cancelled_reports_cancelled() {
        init_test_logging();
        let source = CancelSource::new();
        let token = source.token();
        source.cancel();

        let err = token.throw_if_cancelled().expect_err("cancelled");
        assert!(err.is_cancelled());
    }

    #[test]
    fn linked_source_follows_inputs() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let a = CancelSource::new();
        let b = CancelSource::new();
        let linked = CancelSource::linked(&[a.token(), b.token()]);
        assert!(!linked.is_cancelled());

        b.cancel();
        assert!(linked.is_cancelled());
        // The other input is unaffected.
        assert!(!a.is_cancelled());
    }

    #[test]
    fn linking_an_already_cancelled_token_cancels_synchronously() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let a = CancelSource::new();
        a.cancel();
        let linked = CancelSource::linked(&[a.token()]);
        assert!(linked.is_cancelled());
    }

    #[test]
    fn cancel_after_replaces_previous_schedule() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let source = CancelSource::with_timeout(Duration::from_secs(60));
        // Reschedule much sooner; the 60s timer must be cancelled, or the
        // loop would sit waiting on it.
        source.cancel_after(Duration::from_millis(10));

        let started = std::time::Instant::now();
        lp.run().expect("run");
        assert!(source.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
