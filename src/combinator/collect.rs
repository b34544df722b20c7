//! Collection combinators: `all` and `all_settled`.
//!
//! Both dispatch every input at call time and preserve input key order in
//! the result. `all` fails fast on the first rejection; `all_settled` always
//! resolves with a settlement record per key.

use crate::combinator::set::TaskSet;
use crate::error::Error;
use crate::promise::Promise;
use crate::types::{Reason, Settlement, TaskKey, TaskMap};
use parking_lot::Mutex;
use std::sync::Arc;

struct GatherState<V> {
    keys: Vec<TaskKey>,
    results: Vec<Option<V>>,
    completed: usize,
}

impl<V: Clone> GatherState<V> {
    fn new(keys: Vec<TaskKey>) -> Self {
        let total = keys.len();
        Self {
            keys,
            results: vec![None; total],
            completed: 0,
        }
    }

    /// Stores one result; returns the finished map once all are in.
    fn store(&mut self, index: usize, value: V) -> Option<TaskMap<V>> {
        self.results[index] = Some(value);
        self.completed += 1;
        if self.completed < self.results.len() {
            return None;
        }
        let mut map = TaskMap::with_capacity(self.keys.len());
        for (key, slot) in self.keys.iter().zip(self.results.drain(..)) {
            if let Some(value) = slot {
                map.insert(key.clone(), value);
            }
        }
        Some(map)
    }
}

/// Resolves with a mapping of all values in input order once every input
/// fulfills; rejects with the first rejection.
///
/// Cancelled inputs count as rejections (their awaiters would observe a
/// `Cancelled` error). Settlements after the first rejection are ignored.
/// Empty input resolves with an empty mapping.
pub fn all<T: Clone + Send + 'static>(tasks: TaskSet<T>) -> Promise<TaskMap<T>> {
    let (promise, resolver) = Promise::deferred();
    let entries = tasks.into_entries();
    if entries.is_empty() {
        resolver.resolve(TaskMap::new());
        return promise;
    }

    let keys: Vec<TaskKey> = entries.iter().map(|(k, _)| k.clone()).collect();
    let state = Arc::new(Mutex::new(GatherState::new(keys)));

    for (index, (_, task)) in entries.into_iter().enumerate() {
        let input = task.into_promise_now();

        let gather = Arc::clone(&state);
        let on_done = resolver.clone();
        input.on_fulfilled(move |value| {
            let finished = gather.lock().store(index, value);
            if let Some(map) = finished {
                on_done.resolve(map);
            }
        });

        let on_fail = resolver.clone();
        input.on_rejected(move |reason| on_fail.reject(reason));

        let on_cancelled = resolver.clone();
        input.on_cancel(move || on_cancelled.reject(Error::cancelled()));
    }
    promise
}

/// Always resolves with a mapping of settlement records, preserving keys.
///
/// Cancelled inputs record as rejections with a `Cancelled` reason.
/// Empty input resolves with an empty mapping.
pub fn all_settled<T: Clone + Send + 'static>(
    tasks: TaskSet<T>,
) -> Promise<TaskMap<Settlement<T>>> {
    let (promise, resolver) = Promise::deferred();
    let entries = tasks.into_entries();
    if entries.is_empty() {
        resolver.resolve(TaskMap::new());
        return promise;
    }

    let keys: Vec<TaskKey> = entries.iter().map(|(k, _)| k.clone()).collect();
    let state = Arc::new(Mutex::new(GatherState::new(keys)));

    for (index, (_, task)) in entries.into_iter().enumerate() {
        let input = task.into_promise_now();
        let record = {
            let gather = Arc::clone(&state);
            let on_done = resolver.clone();
            move |settlement: Settlement<T>| {
                let finished = gather.lock().store(index, settlement);
                if let Some(map) = finished {
                    on_done.resolve(map);
                }
            }
        };

        let on_ok = record.clone();
        input.on_fulfilled(move |value| on_ok(Settlement::Fulfilled(value)));

        let on_err = record.clone();
        input.on_rejected(move |reason| on_err(Settlement::Rejected(reason)));

        input.on_cancel(move || {
            record(Settlement::Rejected(Reason::Error(Error::cancelled())));
        });
    }
    promise
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinator::set::{Task, TaskValue};
    use crate::runtime::EventLoop;
    use crate::task::spawn;
    use crate::test_utils::init_test_logging;
    use crate::time::delay;
    use crate::ErrorKind;
    use std::time::Duration;

    #[test]
    fn all_on_empty_input_resolves_empty() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let p = all(TaskSet::<i32>::new());
        assert_eq!(p.value().expect("settled"), TaskMap::new());
    }

    #[test]
    fn all_preserves_input_key_order() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let set = TaskSet::new()
            .with("slow", Task::promise(delay(Duration::from_millis(20)).then(|()| Ok(1))))
            .with("fast", Task::promise(delay(Duration::from_millis(5)).then(|()| Ok(2))))
            .with("ready", Task::value(3));

        let p = all(set);
        lp.run().expect("run");

        let map = p.value().expect("fulfilled");
        let keys: Vec<String> = map.keys().map(ToString::to_string).collect();
        assert_eq!(keys, ["slow", "fast", "ready"]);
        assert_eq!(map.get_named("slow"), Some(&1));
        assert_eq!(map.get_named("fast"), Some(&2));
        assert_eq!(map.get_named("ready"), Some(&3));
    }

    #[test]
    fn all_rejects_with_first_rejection() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let set: TaskSet<i32> = TaskSet::new()
            .with(0usize, Task::promise(spawn(|| Ok(1))))
            .with(1usize, Task::promise(Promise::rejected("early failure")))
            .with(2usize, Task::promise(spawn(|| Ok(3))));

        let p = all(set);
        lp.run().expect("run");

        let err = p.reason().expect("reason").into_error();
        assert!(err.to_string().contains("early failure"));
    }

    #[test]
    fn all_treats_cancelled_input_as_rejection() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let (doomed, _keep) = Promise::<i32>::deferred();
        let set = TaskSet::new()
            .with(0usize, Task::value(1))
            .with(1usize, Task::promise(doomed.clone()));

        let p = all(set);
        lp.next_tick(move || doomed.cancel());
        lp.run().expect("run");

        let err = p.reason().expect("reason").into_error();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn all_settled_records_every_outcome() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let (doomed, _keep) = Promise::<i32>::deferred();
        let set = TaskSet::new()
            .with("ok", Task::value(10))
            .with("err", Task::from_fn(|| Err(crate::Error::invalid_argument("broken"))))
            .with("gone", Task::promise(doomed.clone()));

        let p = all_settled(set);
        lp.next_tick(move || doomed.cancel());
        lp.run().expect("run");

        let map = p.value().expect("always resolves");
        assert!(map.get_named("ok").expect("ok").is_fulfilled());
        assert!(map.get_named("err").expect("err").is_rejected());
        let gone = map.get_named("gone").expect("gone");
        assert!(gone.reason().expect("reason").is_cancelled());
    }

    #[test]
    fn all_settled_callable_values_pass_through() {
        init_test_logging();
        let lp = EventLoop::new();
        let _guard = lp.enter();

        let set = TaskSet::new()
            .with(0usize, Task::from_fn(|| Ok(TaskValue::Value(5))))
            .with(
                1usize,
                Task::from_fn(|| Ok(TaskValue::Promise(Promise::resolved(6)))),
            );

        let p = all_settled(set);
        lp.run().expect("run");

        let map = p.value().expect("resolved");
        assert_eq!(map.get_index(0).and_then(Settlement::value), Some(&5));
        assert_eq!(map.get_index(1).and_then(Settlement::value), Some(&6));
    }
}
