//! Fiber and loop context.
//!
//! Answers "am I inside a fiber?" and "which loop owns this thread?".
//! Both are thread-locals: fiber threads install them on startup, the loop
//! thread installs them for the duration of `run()`, and any thread may
//! install a loop explicitly via [`EventLoop::enter`](super::EventLoop::enter).
//! Threads with no installed loop fall back to the process-wide default loop.

use crate::error::{Error, Result};
use crate::runtime::event_loop::{EventLoop, LoopHandle};
use crate::runtime::fiber::FiberHandle;
use std::cell::RefCell;
use std::sync::OnceLock;

thread_local! {
    static CURRENT_LOOP: RefCell<Option<LoopHandle>> = const { RefCell::new(None) };
    static CURRENT_FIBER: RefCell<Option<FiberHandle>> = const { RefCell::new(None) };
}

static DEFAULT_LOOP: OnceLock<LoopHandle> = OnceLock::new();

/// Returns whether execution is currently inside any fiber.
#[must_use]
pub fn in_fiber() -> bool {
    CURRENT_FIBER.with(|f| f.borrow().is_some())
}

/// Returns the currently running fiber, if any.
#[must_use]
pub fn current_fiber() -> Option<FiberHandle> {
    CURRENT_FIBER.with(|f| f.borrow().clone())
}

/// Fails with a `NotInFiber` error when called outside a fiber.
///
/// # Errors
///
/// Returns [`crate::ErrorKind::NotInFiber`] carrying `message` as context.
pub fn ensure_in_fiber(message: &str) -> Result<FiberHandle> {
    current_fiber().ok_or_else(|| Error::not_in_fiber(message))
}

/// Returns the process-wide default event loop, creating it on first use.
#[must_use]
pub fn default_loop() -> LoopHandle {
    DEFAULT_LOOP.get_or_init(EventLoop::new).clone()
}

/// Returns the loop for the current context.
///
/// Fiber threads and a running loop have an installed loop; other threads
/// use the default loop.
#[must_use]
pub fn current_loop() -> LoopHandle {
    CURRENT_LOOP
        .with(|l| l.borrow().clone())
        .unwrap_or_else(default_loop)
}

/// Installs the loop and fiber handle for a fiber thread.
///
/// Fiber threads never uninstall; the thread exits with its fiber.
pub(crate) fn enter_fiber_thread(lp: LoopHandle, handle: FiberHandle) {
    CURRENT_LOOP.with(|l| *l.borrow_mut() = Some(lp));
    CURRENT_FIBER.with(|f| *f.borrow_mut() = Some(handle));
}

/// Suspends the current fiber until the loop resumes it.
///
/// # Errors
///
/// Returns `NotInFiber` when called outside a fiber.
pub(crate) fn suspend_current() -> Result<()> {
    let handle = ensure_in_fiber("suspend requires a fiber")?;
    tracing::trace!(fiber = %handle.id(), "fiber suspending");
    handle.suspend();
    tracing::trace!(fiber = %handle.id(), "fiber resumed");
    Ok(())
}

/// Guard restoring the previously installed loop on drop.
///
/// Returned by [`EventLoop::enter`](super::EventLoop::enter).
#[derive(Debug)]
pub struct EnterGuard {
    prev: Option<LoopHandle>,
}

pub(crate) fn install_loop(lp: LoopHandle) -> EnterGuard {
    let prev = CURRENT_LOOP.with(|l| l.borrow_mut().replace(lp));
    EnterGuard { prev }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_LOOP.with(|l| *l.borrow_mut() = prev);
    }
}
