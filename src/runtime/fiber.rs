//! Stackful fibers backed by parked OS threads.
//!
//! A fiber owns a real call stack: its body runs on a dedicated OS thread.
//! Cooperative scheduling is enforced by a handoff cell — at any instant
//! either the event loop or exactly one fiber holds the turn, so ordinary
//! memory accesses between suspension points are free of data races with
//! other fibers.
//!
//! The handoff protocol:
//!
//! ```text
//! loop:  resume() ─────► turn = Fiber, notify, wait until turn = Loop
//! fiber: suspend() ────► turn = Loop, notify, wait until turn = Fiber
//! fiber: (body ends) ──► phase = Terminated, turn = Loop, notify
//! ```

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::context;
use crate::runtime::event_loop::LoopHandle;
use crate::types::FiberId;
use parking_lot::{Condvar, Mutex};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// The lifecycle phase of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FiberPhase {
    /// Created but never resumed.
    NotStarted,
    /// Currently holding the turn.
    Running,
    /// Yielded the turn back to the loop; waiting for resumption.
    Suspended,
    /// Body returned; the backing thread has exited or is exiting.
    Terminated,
}

/// Which side currently holds the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Loop,
    Fiber,
}

#[derive(Debug)]
struct HandoffInner {
    turn: Turn,
    phase: FiberPhase,
    shutdown: bool,
}

/// The synchronization cell shared by a fiber thread and the event loop.
#[derive(Debug)]
pub(crate) struct Handoff {
    inner: Mutex<HandoffInner>,
    cv: Condvar,
}

impl Handoff {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HandoffInner {
                turn: Turn::Loop,
                phase: FiberPhase::NotStarted,
                shutdown: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Loop side: hand the turn to the fiber and block until it yields back.
    ///
    /// Returns the fiber's phase after the yield (`Suspended` or
    /// `Terminated`).
    pub(crate) fn resume(&self) -> FiberPhase {
        let mut inner = self.inner.lock();
        inner.turn = Turn::Fiber;
        self.cv.notify_all();
        while inner.turn == Turn::Fiber {
            self.cv.wait(&mut inner);
        }
        inner.phase
    }

    /// Fiber side: yield the turn to the loop and block until resumed.
    pub(crate) fn suspend(&self) {
        let mut inner = self.inner.lock();
        inner.phase = FiberPhase::Suspended;
        inner.turn = Turn::Loop;
        self.cv.notify_all();
        while inner.turn == Turn::Loop {
            self.cv.wait(&mut inner);
        }
        inner.phase = FiberPhase::Running;
    }

    /// Fiber side: block until the loop grants the first turn.
    ///
    /// Returns false if the fiber was shut down before ever starting.
    fn await_first_turn(&self) -> bool {
        let mut inner = self.inner.lock();
        while inner.turn == Turn::Loop && !inner.shutdown {
            self.cv.wait(&mut inner);
        }
        if inner.shutdown {
            inner.phase = FiberPhase::Terminated;
            inner.turn = Turn::Loop;
            self.cv.notify_all();
            return false;
        }
        inner.phase = FiberPhase::Running;
        true
    }

    /// Fiber side: mark the fiber terminated and yield the turn for good.
    fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.phase = FiberPhase::Terminated;
        inner.turn = Turn::Loop;
        self.cv.notify_all();
    }

    /// Requests shutdown of a fiber that has not started yet.
    ///
    /// Started fibers are unaffected; a suspended fiber's thread stays
    /// parked until process exit (only `reset()` abandons fibers).
    fn request_shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        self.cv.notify_all();
    }
}

/// A stackful fiber owned by the event loop.
#[derive(Debug)]
pub(crate) struct Fiber {
    id: FiberId,
    handoff: Arc<Handoff>,
}

impl Fiber {
    /// Spawns a fiber thread that parks until the loop grants the first turn.
    ///
    /// The body is responsible for delivering its own result (normally by
    /// settling a promise); panics escaping the body are caught so the turn
    /// is always handed back to the loop.
    pub(crate) fn spawn(
        lp: LoopHandle,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<Arc<Self>> {
        let id = FiberId::next();
        let handoff = Arc::new(Handoff::new());
        let thread_handoff = Arc::clone(&handoff);

        let config = lp.config();
        let builder = std::thread::Builder::new()
            .name(format!("{}-{id}", config.fiber_name_prefix))
            .stack_size(config.fiber_stack_size);

        builder
            .spawn(move || fiber_main(id, lp, thread_handoff, body))
            .map_err(|e| {
                Error::new(ErrorKind::Internal)
                    .with_context(format!("failed to spawn fiber thread for {id}"))
                    .with_source(e)
            })?;

        Ok(Arc::new(Self { id, handoff }))
    }

    /// Returns this fiber's identifier.
    pub(crate) const fn id(&self) -> FiberId {
        self.id
    }

    /// Hands the turn to this fiber; returns its phase after it yields back.
    pub(crate) fn resume(&self) -> FiberPhase {
        self.handoff.resume()
    }

    /// Shuts down a not-yet-started fiber (used by `reset`).
    pub(crate) fn request_shutdown(&self) {
        self.handoff.request_shutdown();
    }
}

/// A lightweight public handle to a running fiber.
///
/// Obtained from [`current_fiber`](crate::runtime::context::current_fiber);
/// continuations hold this handle (not the fiber itself) so a settled promise
/// can schedule the fiber without keeping its resources alive.
#[derive(Debug, Clone)]
pub struct FiberHandle {
    pub(crate) id: FiberId,
    pub(crate) handoff: Arc<Handoff>,
}

impl FiberHandle {
    /// Returns the fiber's identifier.
    #[must_use]
    pub const fn id(&self) -> FiberId {
        self.id
    }

    /// Fiber side: yield the turn to the loop and block until resumed.
    pub(crate) fn suspend(&self) {
        self.handoff.suspend();
    }
}

fn fiber_main(
    id: FiberId,
    lp: LoopHandle,
    handoff: Arc<Handoff>,
    body: Box<dyn FnOnce() + Send + 'static>,
) {
    let handle = FiberHandle {
        id,
        handoff: Arc::clone(&handoff),
    };
    context::enter_fiber_thread(lp, handle);

    if !handoff.await_first_turn() {
        tracing::trace!(fiber = %id, "fiber shut down before start");
        return;
    }

    tracing::trace!(fiber = %id, "fiber started");
    // The body settles its promise internally; any panic that escapes it is
    // already a bug upstream, but the turn must be returned regardless.
    if std::panic::catch_unwind(AssertUnwindSafe(body)).is_err() {
        tracing::error!(fiber = %id, "panic escaped fiber body");
    }
    tracing::trace!(fiber = %id, "fiber terminated");
    handoff.finish();
}
