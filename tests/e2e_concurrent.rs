//! End-to-end dispatch-pool scenarios: concurrency caps and batching.

use filament::test_utils::init_test_logging;
use filament::{batch, concurrent, concurrent_settled, wait, EventLoop, Task, TaskSet, TaskValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Builds a task that tracks its own in-flight window around a short delay.
fn gated_task(
    result: usize,
    in_flight: &Arc<AtomicUsize>,
    max_seen: &Arc<AtomicUsize>,
) -> Task<usize> {
    let in_flight = Arc::clone(in_flight);
    let max_seen = Arc::clone(max_seen);
    Task::from_fn(move || {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_seen.fetch_max(now, Ordering::SeqCst);
        let done = Arc::clone(&in_flight);
        Ok(TaskValue::Promise(
            filament::delay(Duration::from_millis(10)).then(move |()| {
                done.fetch_sub(1, Ordering::SeqCst);
                Ok(result)
            }),
        ))
    })
}

#[test]
fn pool_observes_limit_and_preserves_order() {
    init_test_logging();
    filament::test_phase!("pool_limit");
    let lp = EventLoop::new();
    let _guard = lp.enter();

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let set: TaskSet<usize> = (0..5)
        .map(|i| gated_task(i, &in_flight, &max_seen))
        .collect();

    let result = wait(&concurrent(set, 2)).expect("all tasks fulfill");

    let max = max_seen.load(Ordering::SeqCst);
    filament::assert_with_log!(max <= 2, "at most two tasks in flight", 2usize, max);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    assert!(result.is_dense());
    assert_eq!(result.into_values(), [0, 1, 2, 3, 4]);
    filament::test_complete!("pool_limit");
}

#[test]
fn limit_of_one_serializes_tasks() {
    init_test_logging();
    let lp = EventLoop::new();
    let _guard = lp.enter();

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let set: TaskSet<usize> = (0..3)
        .map(|i| gated_task(i, &in_flight, &max_seen))
        .collect();

    let result = wait(&concurrent(set, 1)).expect("all tasks fulfill");
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(result.into_values(), [0, 1, 2]);
}

#[test]
fn batch_caps_in_flight_at_batch_size() {
    init_test_logging();
    let lp = EventLoop::new();
    let _guard = lp.enter();

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let set: TaskSet<usize> = (0..7)
        .map(|i| gated_task(i, &in_flight, &max_seen))
        .collect();

    let result = wait(&batch(set, 3, None)).expect("all chunks fulfill");
    assert!(max_seen.load(Ordering::SeqCst) <= 3);
    assert_eq!(result.into_values(), [0, 1, 2, 3, 4, 5, 6]);
}

#[test]
fn settled_pool_reports_mixed_outcomes_at_original_keys() {
    init_test_logging();
    let lp = EventLoop::new();
    let _guard = lp.enter();

    let set: TaskSet<i32> = TaskSet::new()
        .with("first", Task::value(1))
        .with(
            "second",
            Task::from_fn(|| Err(filament::Error::invalid_argument("second failed"))),
        )
        .with(
            "third",
            Task::from_fn(|| Ok(TaskValue::Promise(filament::Promise::resolved(3)))),
        );

    let records = wait(&concurrent_settled(set, 2)).expect("settled pools never reject");
    assert_eq!(records.len(), 3);
    assert!(records.get_named("first").expect("first").is_fulfilled());
    assert!(records.get_named("second").expect("second").is_rejected());
    assert!(records.get_named("third").expect("third").is_fulfilled());
}

#[test]
fn large_fan_out_completes_with_small_limit() {
    init_test_logging();
    let lp = EventLoop::new();
    let _guard = lp.enter();

    let set: TaskSet<usize> = (0..40)
        .map(|i| {
            Task::from_fn(move || {
                Ok(TaskValue::Promise(
                    filament::delay(Duration::from_millis(1)).then(move |()| Ok(i)),
                ))
            })
        })
        .collect();

    let result = wait(&concurrent(set, 4)).expect("all tasks fulfill");
    assert_eq!(result.len(), 40);
    assert_eq!(result.into_values(), (0..40).collect::<Vec<_>>());
}
