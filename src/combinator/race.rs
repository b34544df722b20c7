//! Racing combinators: `race` and `any`.
//!
//! `race` adopts the first input to settle, whatever its outcome. `any`
//! adopts the first fulfillment and only fails — with an aggregate of every
//! reason in input order — once all inputs have rejected.

use crate::combinator::set::TaskSet;
use crate::error::Error;
use crate::promise::Promise;
use parking_lot::Mutex;
use std::sync::Arc;

/// Settles with the first input to settle, adopting its value or reason.
///
/// A cancelled first-settler cancels the result. Losing inputs are not
/// cancelled. Empty input rejects with `InvalidArgument`.
pub fn race<T: Clone + Send + 'static>(tasks: TaskSet<T>) -> Promise<T> {
    let (promise, resolver) = Promise::deferred();
    let entries = tasks.into_entries();
    if entries.is_empty() {
        resolver.reject(Error::invalid_argument("race requires at least one input"));
        return promise;
    }

    for (_, task) in entries {
        let input = task.into_promise_now();
        resolver.follow(&input);
    }
    promise
}

/// Resolves with the value of the first fulfillment; if all inputs reject,
/// fails with an `Aggregate` error carrying every reason in input order.
///
/// Cancelled inputs count as rejections with a `Cancelled` reason.
/// Empty input rejects with `InvalidArgument`.
pub fn any<T: Clone + Send + 'static>(tasks: TaskSet<T>) -> Promise<T> {
    let (promise, resolver) = Promise::deferred();
    let entries = tasks.into_entries();
    if entries.is_empty() {
        resolver.reject(Error::invalid_argument("any requires at least one input"));
        return promise;
    }

    struct AnyState {
        errors: Vec<Option<Error>>,
        rejected: usize,
    }

    let total = entries.len();
    let state = Arc::new(Mutex::new(AnyState {
        errors: (0..total).map(|_| None).collect(),
        rejected: 0,
    }));

    for (index, (_, task)) in entries.into_iter().enumerate() {
        let input = task.into_promise_now();

        let on_ok = resolver.clone();
        input.on_fulfilled(move |value| on_ok.resolve(value));

        let record = {
            let state = Arc::clone(&state);
            let on_all_failed = resolver.clone();
            move |error: Error| {
                let aggregate = {
                    let mut s = state.lock();
                    s.errors[index] = Some(error);
                    s.rejected += 1;
                    if s.rejected < total {
                        None
                    } else {
                        Some(s.errors.iter_mut().filter_map(Option::take).collect())
                    }
                };
                if let Some(errors) = aggregate {
                    on_all_failed.reject(Error::aggregate(errors));
                }
            }
        };

        let on_err = record.clone();
        input.on_rejected(move |reason| on_err(reason.into_error()));
        input.on_cancel(move || record(Error::cancelled()));
    }
    promise
}
