//! Async mutex with FIFO queueing.
//!
//! [`Mutex::acquire`] returns a guard-promise: fulfilled immediately when the
//! lock is free, pending in a strict FIFO queue otherwise. Releasing a guard
//! hands the lock to the next waiter whose acquire-promise is still pending —
//! waiters whose acquisition was cancelled are skipped — or clears the lock.
//!
//! The guard is one-shot: releasing twice is a no-op. Guards are not
//! released on drop, because guard clones travel through promise state;
//! release is an explicit operation.

use crate::promise::{Promise, Resolver};
use parking_lot::Mutex as PlMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct MutexState {
    locked: bool,
    waiters: VecDeque<Resolver<MutexGuard>>,
}

#[derive(Debug, Default)]
struct MutexInner {
    state: PlMutex<MutexState>,
}

/// An async lock for mutual exclusion between fibers.
///
/// Cloning the mutex clones the handle; all clones share one lock state.
///
/// # Fairness
///
/// Strict FIFO: waiters acquire in the order they called
/// [`acquire`](Mutex::acquire), and [`try_acquire`](Mutex::try_acquire)
/// never barges in front of a pending waiter.
#[derive(Debug, Clone, Default)]
pub struct Mutex {
    inner: Arc<MutexInner>,
}

impl Mutex {
    /// Creates a new unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the mutex, returning a guard-promise.
    ///
    /// If the mutex is unlocked the promise is already fulfilled; otherwise
    /// it fulfills when every earlier waiter has held and released the lock.
    /// Cancelling the returned promise abandons the queue slot.
    pub fn acquire(&self) -> Promise<MutexGuard> {
        let mut state = self.inner.state.lock();
        if state.locked {
            let (promise, resolver) = Promise::deferred();
            state.waiters.push_back(resolver);
            drop(state);
            tracing::trace!("mutex contended; waiter enqueued");
            promise
        } else {
            state.locked = true;
            drop(state);
            tracing::trace!("mutex acquired immediately");
            Promise::resolved(MutexGuard::new(Arc::clone(&self.inner)))
        }
    }

    /// Acquires the mutex only if it is free and no waiter is queued.
    #[must_use]
    pub fn try_acquire(&self) -> Option<MutexGuard> {
        let mut state = self.inner.state.lock();
        if state.locked || !state.waiters.is_empty() {
            return None;
        }
        state.locked = true;
        drop(state);
        Some(MutexGuard::new(Arc::clone(&self.inner)))
    }

    /// Returns true while exactly one unreleased guard exists.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.state.lock().locked
    }

    /// Returns the number of waiters whose acquire-promises are still
    /// pending.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.inner
            .state
            .lock()
            .waiters
            .iter()
            .filter(|resolver| resolver.is_pending())
            .count()
    }

    /// Returns true if no pending waiter is queued.
    #[must_use]
    pub fn is_queue_empty(&self) -> bool {
        self.queue_length() == 0
    }
}

/// A one-shot handle held by the current owner of a [`Mutex`].
///
/// Clones share the one-shot flag: releasing any clone releases the lock
/// once, and every further release is a no-op.
#[derive(Debug, Clone)]
pub struct MutexGuard {
    mutex: Arc<MutexInner>,
    released: Arc<AtomicBool>,
}

impl MutexGuard {
    fn new(mutex: Arc<MutexInner>) -> Self {
        Self {
            mutex,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Releases the lock: hands it to the next pending waiter, or clears it.
    ///
    /// Idempotent; only the first call has an effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        // Pop until a waiter that is still pending; cancelled acquisitions
        // are skipped. Resolve outside the state lock.
        let next = {
            let mut state = self.mutex.state.lock();
            loop {
                match state.waiters.pop_front() {
                    None => {
                        state.locked = false;
                        break None;
                    }
                    Some(resolver) if resolver.is_pending() => break Some(resolver),
                    Some(_) => {}
                }
            }
        };

        match next {
            Some(resolver) => {
                tracing::trace!("mutex handed to next waiter");
                resolver.resolve(Self::new(Arc::clone(&self.mutex)));
            }
            None => tracing::trace!("mutex released"),
        }
    }

    /// Returns true once this guard (or a clone) has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;
    use crate::task::{spawn, wait};
    use crate::test_utils::init_test_logging;
    use crate::time::sleep;
    use std::time::Duration;

    #[test]
    fn new_mutex_is_unlocked() {
        init_test_logging();
        let mu = Mutex::new();
        assert!(!mu.is_locked());
        assert!(mu.is_queue_empty());
    }

    #[test]
    fn immediate_acquire_fulfills_synchronously() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let mu = Mutex::new();
        let p = mu.acquire();
        assert!(p.is_fulfilled());
        assert!(mu.is_locked());

        p.value().expect("guard").release();
        assert!(!mu.is_locked());
    }

    #[test]
    fn release_twice_is_a_noop() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let mu = Mutex::new();
        let first = mu.acquire().value().expect("guard");
        let queued = mu.acquire();
        assert!(queued.is_pending());

        first.release();
        assert!(first.is_released());
        assert!(queued.is_fulfilled());
        assert!(mu.is_locked());

        // A second release must not steal the lock from the new owner.
        first.release();
        assert!(mu.is_locked());

        queued.value().expect("guard").release();
        assert!(!mu.is_locked());
    }

    #[test]
    fn waiters_resume_in_fifo_order() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let mu = Mutex::new();
        let holder = mu.acquire().value().expect("guard");

        let first = mu.acquire();
        let second = mu.acquire();
        assert_eq!(mu.queue_length(), 2);

        holder.release();
        assert!(first.is_fulfilled());
        assert!(second.is_pending());

        first.value().expect("guard").release();
        assert!(second.is_fulfilled());
        assert_eq!(mu.queue_length(), 0);
    }

    #[test]
    fn cancelled_waiter_is_skipped_on_release() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let mu = Mutex::new();
        let holder = mu.acquire().value().expect("guard");

        let abandoned = mu.acquire();
        let patient = mu.acquire();
        abandoned.cancel();
        assert_eq!(mu.queue_length(), 1);

        holder.release();
        assert!(abandoned.is_cancelled());
        assert!(patient.is_fulfilled());
        assert!(mu.is_locked());
        patient.value().expect("guard").release();
    }

    #[test]
    fn try_acquire_respects_fifo() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let mu = Mutex::new();
        let holder = mu.try_acquire().expect("free mutex");
        assert!(mu.try_acquire().is_none());

        let waiting = mu.acquire();
        holder.release();
        assert!(waiting.is_fulfilled());

        // The waiter owns the lock now; try_acquire stays out.
        assert!(mu.try_acquire().is_none());
        waiting.value().expect("guard").release();
        assert!(mu.try_acquire().is_some());
    }

    #[test]
    fn critical_sections_are_serialized_across_fibers() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let mu = Mutex::new();
        let counter = Arc::new(PlMutex::new(0u32));
        let log = Arc::new(PlMutex::new(Vec::new()));

        let mut results = Vec::new();
        for i in 0..5u32 {
            let mu = mu.clone();
            let counter = Arc::clone(&counter);
            let log = Arc::clone(&log);
            results.push(spawn(move || {
                let guard = wait(&mu.acquire())?;
                let observed = *counter.lock();
                sleep(Duration::from_millis(10))?;
                *counter.lock() = observed + 1;
                log.lock().push(i);
                guard.release();
                Ok(())
            }));
        }

        lp.run().expect("run");
        for p in &results {
            assert!(p.is_fulfilled());
        }
        // Increments never interleave: each fiber read n and wrote n + 1.
        assert_eq!(*counter.lock(), 5);
        assert_eq!(log.lock().len(), 5);
        assert!(!mu.is_locked());
    }
}
