//! Eagerly-evaluated promises.
//!
//! A [`Promise`] is a cheap-clone handle to a mutable state machine with
//! exactly one of four states: pending, fulfilled, rejected, or cancelled.
//! Only pending is transient, and the first terminal state wins — resolving
//! or rejecting a cancelled promise is a no-op.
//!
//! Continuations are one-shot callbacks drained on settlement:
//!
//! - raw continuations ([`Promise::on_fulfilled`], [`Promise::on_rejected`],
//!   [`Promise::on_cancel`]) fire in registration order, synchronously when
//!   the promise is already settled;
//! - derived chains ([`Promise::then`], [`Promise::catch`]) always run their
//!   callback through a microtask, so a chain registered on a settled promise
//!   never re-enters the caller's frame.
//!
//! Producers settle through a [`Resolver`]; cancellable producers install a
//! cancellation hook that releases their underlying resource (a timer, for
//! instance) when the promise is cancelled.

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::context;
use crate::runtime::event_loop::LoopHandle;
use crate::types::{PromiseId, Reason};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

type FulfillCallback<T> = Box<dyn FnOnce(T) + Send + 'static>;
type RejectCallback = Box<dyn FnOnce(Reason) + Send + 'static>;
type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

/// The state of a promise.
#[derive(Debug)]
enum Phase<T> {
    Pending,
    Fulfilled(T),
    Rejected(Reason),
    Cancelled,
}

impl<T> Phase<T> {
    const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fulfilled(_) => "fulfilled",
            Self::Rejected(_) => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

struct PromiseState<T> {
    phase: Phase<T>,
    on_fulfill: SmallVec<[FulfillCallback<T>; 2]>,
    on_reject: SmallVec<[RejectCallback; 2]>,
    on_cancel: SmallVec<[CancelCallback; 2]>,
    /// Fire on any terminal transition; used for auto-untracking.
    settle_watchers: SmallVec<[CancelCallback; 2]>,
    /// Producer-supplied resource release, run when cancelled.
    cancel_hook: Option<CancelCallback>,
}

pub(crate) struct Inner<T> {
    id: PromiseId,
    lp: LoopHandle,
    state: Mutex<PromiseState<T>>,
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn new(lp: LoopHandle) -> Arc<Self> {
        Arc::new(Self {
            id: PromiseId::next(),
            lp,
            state: Mutex::new(PromiseState {
                phase: Phase::Pending,
                on_fulfill: SmallVec::new(),
                on_reject: SmallVec::new(),
                on_cancel: SmallVec::new(),
                settle_watchers: SmallVec::new(),
                cancel_hook: None,
            }),
        })
    }

    /// Transitions pending → fulfilled and fires continuations in order.
    fn fulfill(&self, value: T) {
        let (callbacks, watchers) = {
            let mut state = self.state.lock();
            if !matches!(state.phase, Phase::Pending) {
                return;
            }
            state.phase = Phase::Fulfilled(value.clone());
            state.on_reject.clear();
            state.on_cancel.clear();
            state.cancel_hook = None;
            (
                std::mem::take(&mut state.on_fulfill),
                std::mem::take(&mut state.settle_watchers),
            )
        };
        self.lp.metrics().promises_settled.increment();
        tracing::trace!(promise = %self.id, "promise fulfilled");
        for callback in callbacks {
            callback(value.clone());
        }
        for watcher in watchers {
            watcher();
        }
    }

    /// Transitions pending → rejected and fires continuations in order.
    fn reject(&self, reason: Reason) {
        let (callbacks, watchers) = {
            let mut state = self.state.lock();
            if !matches!(state.phase, Phase::Pending) {
                return;
            }
            state.phase = Phase::Rejected(reason.clone());
            state.on_fulfill.clear();
            state.on_cancel.clear();
            state.cancel_hook = None;
            (
                std::mem::take(&mut state.on_reject),
                std::mem::take(&mut state.settle_watchers),
            )
        };
        self.lp.metrics().promises_settled.increment();
        tracing::trace!(promise = %self.id, reason = %reason, "promise rejected");
        for callback in callbacks {
            callback(reason.clone());
        }
        for watcher in watchers {
            watcher();
        }
    }

    /// Transitions pending → cancelled: runs the producer hook first, then
    /// `on_cancel` continuations in registration order.
    fn cancel(&self) {
        let (hook, callbacks, watchers) = {
            let mut state = self.state.lock();
            if !matches!(state.phase, Phase::Pending) {
                return;
            }
            state.phase = Phase::Cancelled;
            state.on_fulfill.clear();
            state.on_reject.clear();
            (
                state.cancel_hook.take(),
                std::mem::take(&mut state.on_cancel),
                std::mem::take(&mut state.settle_watchers),
            )
        };
        self.lp.metrics().promises_settled.increment();
        tracing::trace!(promise = %self.id, "promise cancelled");
        if let Some(hook) = hook {
            hook();
        }
        for callback in callbacks {
            callback();
        }
        for watcher in watchers {
            watcher();
        }
    }

    fn push_fulfill(&self, callback: FulfillCallback<T>) {
        let now = {
            let mut state = self.state.lock();
            match &state.phase {
                Phase::Pending => {
                    state.on_fulfill.push(callback);
                    return;
                }
                Phase::Fulfilled(value) => Some(value.clone()),
                Phase::Rejected(_) | Phase::Cancelled => None,
            }
        };
        if let Some(value) = now {
            callback(value);
        }
    }

    fn push_reject(&self, callback: RejectCallback) {
        let now = {
            let mut state = self.state.lock();
            match &state.phase {
                Phase::Pending => {
                    state.on_reject.push(callback);
                    return;
                }
                Phase::Rejected(reason) => Some(reason.clone()),
                Phase::Fulfilled(_) | Phase::Cancelled => None,
            }
        };
        if let Some(reason) = now {
            callback(reason);
        }
    }

    fn push_cancel(&self, callback: CancelCallback) {
        let cancelled = {
            let mut state = self.state.lock();
            match &state.phase {
                Phase::Pending => {
                    state.on_cancel.push(callback);
                    return;
                }
                Phase::Cancelled => true,
                Phase::Fulfilled(_) | Phase::Rejected(_) => false,
            }
        };
        if cancelled {
            callback();
        }
    }

    fn is_settled(&self) -> bool {
        !matches!(self.state.lock().phase, Phase::Pending)
    }
}

/// Type-erased promise handle used by cancellation tokens.
///
/// Lets one token track promises of heterogeneous value types.
pub(crate) trait PromiseControl: Send + Sync {
    /// The promise's identifier.
    fn id(&self) -> PromiseId;
    /// Cancels the promise if still pending.
    fn cancel(&self);
    /// Returns true once the promise left the pending state.
    fn is_settled(&self) -> bool;
    /// Runs `watcher` on any terminal transition (now, if already settled).
    fn on_settled(&self, watcher: Box<dyn FnOnce() + Send + 'static>);
}

impl<T: Clone + Send + 'static> PromiseControl for Inner<T> {
    fn id(&self) -> PromiseId {
        self.id
    }

    fn cancel(&self) {
        Self::cancel(self);
    }

    fn is_settled(&self) -> bool {
        Self::is_settled(self)
    }

    fn on_settled(&self, watcher: Box<dyn FnOnce() + Send + 'static>) {
        {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::Pending) {
                state.settle_watchers.push(watcher);
                return;
            }
        }
        watcher();
    }
}

/// A handle to a future value.
///
/// Promises are shared objects: cloning the handle does not copy the state,
/// and any number of consumers may register continuations.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.lock().phase.name())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Constructs a pending promise and invokes `executor` synchronously.
    ///
    /// An executor returning `Err` — or panicking — rejects the promise.
    pub fn new(executor: impl FnOnce(Resolver<T>) -> Result<()>) -> Self {
        let (promise, resolver) = Self::deferred();
        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| executor(resolver.clone())));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => resolver.reject(e),
            Err(payload) => resolver.reject(Error::from_panic(payload.as_ref())),
        }
        promise
    }

    /// Constructs a pending promise and its resolver pair.
    #[must_use]
    pub fn deferred() -> (Self, Resolver<T>) {
        Self::deferred_on(context::current_loop())
    }

    /// Constructs a pending promise bound to an explicit loop.
    #[must_use]
    pub(crate) fn deferred_on(lp: LoopHandle) -> (Self, Resolver<T>) {
        let inner = Inner::new(lp);
        (
            Self {
                inner: Arc::clone(&inner),
            },
            Resolver { inner },
        )
    }

    /// Constructs an already-fulfilled promise.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        let (promise, resolver) = Self::deferred();
        resolver.resolve(value);
        promise
    }

    /// Constructs an already-rejected promise.
    #[must_use]
    pub fn rejected(reason: impl Into<Reason>) -> Self {
        let (promise, resolver) = Self::deferred();
        resolver.reject(reason);
        promise
    }

    /// Returns this promise's identifier.
    #[must_use]
    pub fn id(&self) -> PromiseId {
        self.inner.id
    }

    /// Returns true while no terminal state has been reached.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Pending)
    }

    /// Returns true once fulfilled.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Fulfilled(_))
    }

    /// Returns true once rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Rejected(_))
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Cancelled)
    }

    /// Returns true once any terminal state has been reached.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.is_settled()
    }

    /// Returns the fulfilled value, if fulfilled.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match &self.inner.state.lock().phase {
            Phase::Fulfilled(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Returns the rejection reason, if rejected.
    #[must_use]
    pub fn reason(&self) -> Option<Reason> {
        match &self.inner.state.lock().phase {
            Phase::Rejected(r) => Some(r.clone()),
            _ => None,
        }
    }

    /// Registers a raw continuation fired on fulfillment.
    ///
    /// Fires synchronously, immediately, if already fulfilled. Each
    /// continuation fires at most once, in registration order.
    pub fn on_fulfilled(&self, callback: impl FnOnce(T) + Send + 'static) {
        self.inner.push_fulfill(Box::new(callback));
    }

    /// Registers a raw continuation fired on rejection.
    pub fn on_rejected(&self, callback: impl FnOnce(Reason) + Send + 'static) {
        self.inner.push_reject(Box::new(callback));
    }

    /// Registers a continuation fired when and only when the promise is
    /// cancelled.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.push_cancel(Box::new(callback));
    }

    /// Installs the producer's cancellation hook.
    ///
    /// The hook runs before `on_cancel` continuations and is used by
    /// cancellable producers (timers) to free their underlying resource.
    /// Installing a hook on an already-cancelled promise runs it immediately.
    pub fn set_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut state = self.inner.state.lock();
            match &state.phase {
                Phase::Pending => {
                    state.cancel_hook = Some(Box::new(hook));
                    return;
                }
                Phase::Cancelled => true,
                Phase::Fulfilled(_) | Phase::Rejected(_) => false,
            }
        };
        if run_now {
            hook();
        }
    }

    /// Cancels the promise if it is still pending.
    ///
    /// Awaiters of a cancelled promise fail with a `Cancelled` error.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Chains a callback onto fulfillment, returning the derived promise.
    ///
    /// The callback runs in a microtask — never synchronously from within
    /// `then` — and its `Ok`/`Err` return settles the derived promise.
    /// Rejection passes through; cancellation cascades.
    pub fn then<U, F>(&self, callback: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let (derived, resolver) = Promise::deferred_on(self.inner.lp.clone());

        let lp = self.inner.lp.clone();
        let on_ok = resolver.clone();
        self.on_fulfilled(move |value| {
            lp.next_tick(move || match callback(value) {
                Ok(mapped) => on_ok.resolve(mapped),
                Err(e) => on_ok.reject(e),
            });
        });

        let lp = self.inner.lp.clone();
        let on_err = resolver.clone();
        self.on_rejected(move |reason| {
            lp.next_tick(move || on_err.reject(reason));
        });

        self.on_cancel(move || resolver.cancel());
        derived
    }

    /// Chains a recovery callback onto rejection, returning the derived
    /// promise.
    ///
    /// Fulfillment passes through; the callback's `Ok`/`Err` return settles
    /// the derived promise on rejection; cancellation cascades.
    pub fn catch<F>(&self, callback: F) -> Self
    where
        F: FnOnce(Reason) -> Result<T> + Send + 'static,
    {
        let (derived, resolver) = Self::deferred_on(self.inner.lp.clone());

        let lp = self.inner.lp.clone();
        let on_ok = resolver.clone();
        self.on_fulfilled(move |value| {
            lp.next_tick(move || on_ok.resolve(value));
        });

        let lp = self.inner.lp.clone();
        let on_err = resolver.clone();
        self.on_rejected(move |reason| {
            lp.next_tick(move || match callback(reason) {
                Ok(recovered) => on_err.resolve(recovered),
                Err(e) => on_err.reject(e),
            });
        });

        self.on_cancel(move || resolver.cancel());
        derived
    }

    /// The synchronous, out-of-fiber wait: drives the event loop until this
    /// promise settles, then returns its value or error.
    ///
    /// # Errors
    ///
    /// - the rejection reason, normalized to an [`Error`]
    /// - [`ErrorKind::Cancelled`] if the promise was cancelled
    /// - [`ErrorKind::LoopBusy`] if the loop is already running elsewhere
    /// - [`ErrorKind::Internal`] if the loop drained without settling it
    pub fn wait_blocking(&self) -> Result<T> {
        if self.is_settled() {
            return self.outcome();
        }
        let lp = self.inner.lp.clone();
        let settled = self.clone();
        lp.run_until(move || settled.is_settled())?;
        self.outcome()
    }

    /// Reads the settled outcome without waiting.
    pub(crate) fn outcome(&self) -> Result<T> {
        match &self.inner.state.lock().phase {
            Phase::Fulfilled(v) => Ok(v.clone()),
            Phase::Rejected(r) => Err(r.clone().into_error()),
            Phase::Cancelled => Err(Error::cancelled()),
            Phase::Pending => Err(Error::new(ErrorKind::Internal)
                .with_context("event loop became idle before promise settled")),
        }
    }

    /// Returns the type-erased control handle for cancellation tracking.
    pub(crate) fn control(&self) -> Arc<dyn PromiseControl> {
        Arc::clone(&self.inner) as Arc<dyn PromiseControl>
    }

    /// Returns the loop this promise schedules its chains on.
    pub(crate) fn loop_handle(&self) -> LoopHandle {
        self.inner.lp.clone()
    }
}

/// The producer half of a promise: settles it exactly once.
///
/// Cloneable; the first terminal transition wins and later calls are no-ops.
pub struct Resolver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").field("id", &self.inner.id).finish()
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Fulfills the promise, if still pending.
    pub fn resolve(&self, value: T) {
        self.inner.fulfill(value);
    }

    /// Rejects the promise, if still pending.
    pub fn reject(&self, reason: impl Into<Reason>) {
        self.inner.reject(reason.into());
    }

    /// Cancels the promise, if still pending.
    pub(crate) fn cancel(&self) {
        self.inner.cancel();
    }

    /// Adopts another promise's state: on `source`'s settlement, settle this
    /// promise the same way (standard promise-follow semantics).
    pub fn follow(&self, source: &Promise<T>) {
        let r = self.clone();
        source.on_fulfilled(move |value| r.resolve(value));
        let r = self.clone();
        source.on_rejected(move |reason| r.reject(reason));
        let r = self.clone();
        source.on_cancel(move || r.cancel());
    }

    /// Returns true while the promise is still pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.inner.is_settled()
    }
}
