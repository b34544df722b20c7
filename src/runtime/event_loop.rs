//! The single-threaded cooperative event loop.
//!
//! The loop multiplexes fibers, microtasks, and timers on one logical thread
//! of control. One iteration:
//!
//! 1. start fibers that have never run;
//! 2. drain microtasks to empty (microtasks may enqueue further microtasks);
//! 3. resume the fibers that were ready at loop entry — fibers scheduled
//!    during this drain run next iteration;
//! 4. fire every timer due at or before now, in (due, insertion) order;
//! 5. exit if every queue is empty, otherwise sleep until the next due-time.
//!
//! Microtasks always drain before the next fiber-resume step, and two fibers
//! scheduled in the same tick resume in scheduling order.

use crate::error::{Error, ErrorKind, Result};
use crate::observability::LoopMetrics;
use crate::runtime::config::LoopConfig;
use crate::runtime::context::{self, EnterGuard};
use crate::runtime::fiber::{Fiber, FiberPhase};
use crate::runtime::timer::TimerHeap;
use crate::types::{FiberId, Time, TimerId};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A shared handle to an [`EventLoop`].
pub type LoopHandle = Arc<EventLoop>;

type Microtask = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct LoopState {
    /// Freshly created fibers that have never been resumed.
    new_fibers: VecDeque<Arc<Fiber>>,
    /// Started fibers scheduled for resumption, in scheduling order.
    ready: VecDeque<FiberId>,
    /// Dedup guard for the ready queue.
    ready_set: HashSet<FiberId>,
    /// Zero-delay callbacks.
    microtasks: VecDeque<Microtask>,
    /// Due-time ordered timers.
    timers: TimerHeap,
    /// All live fibers (started or not), by id.
    fibers: HashMap<FiberId, Arc<Fiber>>,
}

impl LoopState {
    fn queues_empty(&self) -> bool {
        self.new_fibers.is_empty() && self.ready.is_empty() && self.microtasks.is_empty()
    }
}

/// The fiber scheduler and timer driver.
///
/// Constructed via [`EventLoop::new`] (environment-derived config) or
/// [`EventLoop::with_config`]. All methods take `&self`; the loop may be
/// driven from any one thread at a time.
pub struct EventLoop {
    state: Mutex<LoopState>,
    /// Signalled whenever new work arrives, to cut idle sleeps short.
    work_cv: Condvar,
    running: AtomicBool,
    origin: Instant,
    config: LoopConfig,
    metrics: LoopMetrics,
}

impl EventLoop {
    /// Creates a loop with configuration from the environment.
    ///
    /// Unparseable `FILAMENT_*` variables are logged and ignored.
    #[must_use]
    pub fn new() -> LoopHandle {
        let config = LoopConfig::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring invalid environment config");
            LoopConfig::default()
        });
        Self::with_config(config)
    }

    /// Creates a loop with an explicit configuration.
    #[must_use]
    pub fn with_config(mut config: LoopConfig) -> LoopHandle {
        config.normalize();
        Arc::new(Self {
            state: Mutex::new(LoopState::default()),
            work_cv: Condvar::new(),
            running: AtomicBool::new(false),
            origin: Instant::now(),
            config,
            metrics: LoopMetrics::new(),
        })
    }

    /// Returns the loop configuration.
    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Returns the loop metrics.
    #[must_use]
    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    /// Returns the current monotonic time since loop creation.
    #[must_use]
    pub fn now(&self) -> Time {
        Time::from_nanos(self.origin.elapsed().as_nanos() as u64)
    }

    /// Installs this loop as the current loop for the calling thread.
    ///
    /// The previous loop (if any) is restored when the guard drops.
    #[must_use]
    pub fn enter(self: &Arc<Self>) -> EnterGuard {
        context::install_loop(Arc::clone(self))
    }

    /// Enqueues a not-yet-started fiber.
    pub(crate) fn add_fiber(&self, fiber: Arc<Fiber>) {
        let id = fiber.id();
        let mut state = self.state.lock();
        state.fibers.insert(id, Arc::clone(&fiber));
        state.new_fibers.push_back(fiber);
        drop(state);
        self.metrics.fibers_spawned.increment();
        self.metrics.live_fibers.increment();
        tracing::trace!(fiber = %id, "fiber enqueued");
        self.work_cv.notify_all();
    }

    /// Enqueues an already-started, suspended fiber for resumption.
    ///
    /// Scheduling a fiber that is already queued, or unknown to the loop,
    /// is a no-op.
    pub fn schedule_fiber(&self, id: FiberId) {
        let mut state = self.state.lock();
        if state.fibers.contains_key(&id) && state.ready_set.insert(id) {
            state.ready.push_back(id);
            drop(state);
            tracing::trace!(fiber = %id, "fiber scheduled");
            self.work_cv.notify_all();
        }
    }

    /// Enqueues a microtask for the current tick.
    pub fn next_tick(&self, callback: impl FnOnce() + Send + 'static) {
        self.state.lock().microtasks.push_back(Box::new(callback));
        self.work_cv.notify_all();
    }

    /// Schedules `callback` to fire after `delay`. Returns a cancellation
    /// handle.
    pub fn add_timer(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerId {
        let due = self.now() + delay;
        let id = self.state.lock().timers.insert(due, Box::new(callback));
        tracing::trace!(timer = %id, due = %due, "timer added");
        self.work_cv.notify_all();
        id
    }

    /// Cancels a pending timer. Returns whether it was still pending.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let cancelled = self.state.lock().timers.cancel(id);
        if cancelled {
            tracing::trace!(timer = %id, "timer cancelled");
        }
        cancelled
    }

    /// Returns true if no queued work or pending timers remain.
    ///
    /// Suspended fibers with nothing scheduled do not count as work: nothing
    /// can wake them.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let mut state = self.state.lock();
        state.queues_empty() && state.timers.peek_deadline().is_none()
    }

    /// Drives the loop until every queue and timer is drained.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::LoopBusy`] if the loop is already running.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        self.run_until(|| false)
    }

    /// Drives the loop until `done()` returns true or everything is drained.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::LoopBusy`] if the loop is already running.
    pub(crate) fn run_until(self: &Arc<Self>, done: impl Fn() -> bool) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::LoopBusy)
                .with_context("event loop re-entry is forbidden"));
        }
        let guard = self.enter();
        let result = self.run_inner(&done);
        drop(guard);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn run_inner(self: &Arc<Self>, done: &impl Fn() -> bool) -> Result<()> {
        loop {
            if done() {
                return Ok(());
            }

            // 1. Start any new fibers.
            let starting: Vec<Arc<Fiber>> = {
                let mut state = self.state.lock();
                state.new_fibers.drain(..).collect()
            };
            for fiber in starting {
                self.drive(&fiber);
            }

            // 2. Drain microtasks fully; they may enqueue further microtasks.
            loop {
                let task = self.state.lock().microtasks.pop_front();
                match task {
                    Some(task) => {
                        task();
                        self.metrics.microtasks_run.increment();
                    }
                    None => break,
                }
            }

            // 3. Resume the fibers that were ready at this point. Fibers
            //    scheduled during the drain run next iteration.
            let snapshot: Vec<FiberId> = {
                let mut state = self.state.lock();
                let ids: Vec<FiberId> = state.ready.drain(..).collect();
                for id in &ids {
                    state.ready_set.remove(id);
                }
                ids
            };
            for id in snapshot {
                let fiber = self.state.lock().fibers.get(&id).cloned();
                if let Some(fiber) = fiber {
                    self.drive(&fiber);
                }
            }

            // 4. Fire all timers due at or before now.
            let due = {
                let now = self.now();
                self.state.lock().timers.pop_expired(now)
            };
            for callback in due {
                callback();
                self.metrics.timers_fired.increment();
            }

            if done() {
                return Ok(());
            }

            // 5. Exit when drained; otherwise sleep until the next due-time.
            let mut state = self.state.lock();
            if !state.queues_empty() {
                continue;
            }
            match state.timers.peek_deadline() {
                None => return Ok(()),
                Some(deadline) => {
                    let now = self.now();
                    if deadline > now {
                        let wait = deadline
                            .duration_since(now)
                            .min(self.config.max_idle_wait);
                        let _ = self.work_cv.wait_for(&mut state, wait);
                    }
                }
            }
        }
    }

    /// Hands the turn to a fiber and reaps it if it terminated.
    fn drive(self: &Arc<Self>, fiber: &Arc<Fiber>) {
        let phase = fiber.resume();
        if phase == FiberPhase::Terminated {
            let mut state = self.state.lock();
            state.fibers.remove(&fiber.id());
            state.ready_set.remove(&fiber.id());
            drop(state);
            self.metrics.fibers_completed.increment();
            self.metrics.live_fibers.decrement();
        }
    }

    /// Discards all queued work, pending timers, and live fibers.
    ///
    /// Not-yet-started fibers are shut down cleanly. Fibers currently
    /// suspended mid-body are abandoned: their threads stay parked until
    /// process exit. This is a test hook, not a production operation.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for fiber in &state.new_fibers {
            fiber.request_shutdown();
        }
        let abandoned = state.fibers.len();
        state.new_fibers.clear();
        state.ready.clear();
        state.ready_set.clear();
        state.microtasks.clear();
        state.timers.clear();
        state.fibers.clear();
        drop(state);
        if abandoned > 0 {
            tracing::debug!(fibers = abandoned, "loop reset discarded live fibers");
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventLoop")
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("new_fibers", &state.new_fibers.len())
            .field("ready", &state.ready.len())
            .field("microtasks", &state.microtasks.len())
            .field("timers", &state.timers.len())
            .field("live_fibers", &state.fibers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn run_on_empty_loop_returns_immediately() {
        init_test_logging();
        let lp = EventLoop::new();
        lp.run().expect("empty run");
        assert!(lp.is_idle());
    }

    #[test]
    fn microtasks_drain_to_empty_including_nested() {
        init_test_logging();
        let lp = EventLoop::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_hits = Arc::clone(&hits);
        let inner_lp = Arc::clone(&lp);
        lp.next_tick(move || {
            inner_hits.fetch_add(1, Ordering::SeqCst);
            let nested_hits = Arc::clone(&inner_hits);
            inner_lp.next_tick(move || {
                nested_hits.fetch_add(1, Ordering::SeqCst);
            });
        });

        lp.run().expect("run");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn timers_fire_in_due_order() {
        init_test_logging();
        let lp = EventLoop::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay_ms, tag) in [(20u64, "late"), (5, "early"), (10, "mid")] {
            let order = Arc::clone(&order);
            lp.add_timer(Duration::from_millis(delay_ms), move || {
                order.lock().push(tag);
            });
        }

        lp.run().expect("run");
        assert_eq!(*order.lock(), ["early", "mid", "late"]);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        init_test_logging();
        let lp = EventLoop::new();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        let id = lp.add_timer(Duration::from_millis(5), move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(lp.cancel_timer(id));
        assert!(!lp.cancel_timer(id));

        lp.run().expect("run");
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn reset_discards_queued_work() {
        init_test_logging();
        let lp = EventLoop::new();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        lp.next_tick(move || flag.store(true, Ordering::SeqCst));
        let flag = Arc::clone(&fired);
        lp.add_timer(Duration::from_millis(1), move || {
            flag.store(true, Ordering::SeqCst);
        });

        lp.reset();
        assert!(lp.is_idle());
        lp.run().expect("run");
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn run_reentry_is_rejected() {
        init_test_logging();
        let lp = EventLoop::new();

        let inner = Arc::clone(&lp);
        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        lp.next_tick(move || {
            *slot.lock() = Some(inner.run());
        });

        lp.run().expect("outer run");
        let inner_result = result.lock().take().expect("microtask ran");
        let err = inner_result.expect_err("re-entry must fail");
        assert_eq!(err.kind(), ErrorKind::LoopBusy);
    }
}
