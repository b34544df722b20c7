//! Runtime metrics.
//!
//! Lightweight counters and gauges for event-loop statistics. Counters are
//! relaxed atomics; snapshots are advisory, not linearizable.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Creates a counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can go up and down.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    /// Creates a gauge at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Increments the gauge by 1.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the gauge by 1.
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Aggregate metrics for one event loop.
#[derive(Debug, Default)]
pub struct LoopMetrics {
    /// Fibers handed to the loop.
    pub fibers_spawned: Counter,
    /// Fibers that ran to termination.
    pub fibers_completed: Counter,
    /// Fibers currently owned by the loop.
    pub live_fibers: Gauge,
    /// Microtasks executed.
    pub microtasks_run: Counter,
    /// Timer callbacks fired.
    pub timers_fired: Counter,
    /// Promises that reached a terminal state.
    pub promises_settled: Counter,
}

impl LoopMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fibers_spawned: Counter::new(),
            fibers_completed: Counter::new(),
            live_fibers: Gauge::new(),
            microtasks_run: Counter::new(),
            timers_fired: Counter::new(),
            promises_settled: Counter::new(),
        }
    }

    /// Captures a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fibers_spawned: self.fibers_spawned.get(),
            fibers_completed: self.fibers_completed.get(),
            live_fibers: self.live_fibers.get(),
            microtasks_run: self.microtasks_run.get(),
            timers_fired: self.timers_fired.get(),
            promises_settled: self.promises_settled.get(),
        }
    }
}

/// A point-in-time copy of [`LoopMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Fibers handed to the loop.
    pub fibers_spawned: u64,
    /// Fibers that ran to termination.
    pub fibers_completed: u64,
    /// Fibers currently owned by the loop.
    pub live_fibers: i64,
    /// Microtasks executed.
    pub microtasks_run: u64,
    /// Timer callbacks fired.
    pub timers_fired: u64,
    /// Promises that reached a terminal state.
    pub promises_settled: u64,
}
