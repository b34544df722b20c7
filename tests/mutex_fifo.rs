//! Mutex fairness under fiber contention.

use filament::test_utils::init_test_logging;
use filament::{spawn, wait, EventLoop, Mutex};
use parking_lot::Mutex as PlMutex;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn five_fibers_increment_under_the_lock() {
    init_test_logging();
    filament::test_phase!("mutex_increments");
    let lp = EventLoop::new();
    let _guard = lp.enter();

    let mu = Mutex::new();
    let counter = Arc::new(PlMutex::new(0u32));
    let log = Arc::new(PlMutex::new(Vec::new()));

    let mut fibers = Vec::new();
    for i in 0..5u32 {
        let mu = mu.clone();
        let counter = Arc::clone(&counter);
        let log = Arc::clone(&log);
        fibers.push(spawn(move || {
            let guard = wait(&mu.acquire())?;
            let old = *counter.lock();
            filament::sleep(Duration::from_millis(10))?;
            *counter.lock() = old + 1;
            log.lock().push((i, old, old + 1));
            guard.release();
            Ok(())
        }));
    }

    lp.run().expect("run");
    for p in &fibers {
        assert!(p.is_fulfilled());
    }

    assert_eq!(*counter.lock(), 5);
    let entries = log.lock();
    assert_eq!(entries.len(), 5);
    // Each holder observed the previous holder's write: n -> n + 1.
    for (slot, (_, old, new)) in entries.iter().enumerate() {
        assert_eq!(*old as usize, slot);
        assert_eq!(*new as usize, slot + 1);
    }
    assert!(!mu.is_locked());
    filament::test_complete!("mutex_increments");
}

#[test]
fn waiters_acquire_in_arrival_order() {
    init_test_logging();
    let lp = EventLoop::new();
    let _guard = lp.enter();

    let mu = Mutex::new();
    let order = Arc::new(PlMutex::new(Vec::new()));

    // The first fiber grabs the lock; the rest line up behind it in spawn
    // order because fibers start in creation order.
    let mut fibers = Vec::new();
    for i in 0..4u32 {
        let mu = mu.clone();
        let order = Arc::clone(&order);
        fibers.push(spawn(move || {
            let guard = wait(&mu.acquire())?;
            order.lock().push(i);
            filament::sleep(Duration::from_millis(5))?;
            guard.release();
            Ok(())
        }));
    }

    lp.run().expect("run");
    assert_eq!(*order.lock(), [0, 1, 2, 3]);
}

#[test]
fn lock_state_matches_guard_lifecycle() {
    init_test_logging();
    let lp = EventLoop::new();
    let _guard = lp.enter();

    let mu = Mutex::new();
    assert!(!mu.is_locked());

    let holder = wait(&mu.acquire()).expect("uncontended acquire");
    assert!(mu.is_locked());
    assert!(mu.is_queue_empty());

    let queued = mu.acquire();
    assert_eq!(mu.queue_length(), 1);

    holder.release();
    // Ownership transferred: still locked, queue drained.
    assert!(mu.is_locked());
    assert!(mu.is_queue_empty());

    wait(&queued).expect("handed over").release();
    assert!(!mu.is_locked());
}
