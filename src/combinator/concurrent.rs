//! Concurrency-capped combinators: `concurrent`, `batch`, and their
//! `*_settled` variants.
//!
//! Tasks dispatch in input order through a shared pool: a scheduling pass —
//! always submitted via `next_tick`, outside the caller's synchronous frame —
//! starts tasks while fewer than `limit` are in flight. Each completion
//! either finishes the pool or requeues the pass. Results land at their
//! original keys regardless of completion order.
//!
//! Task wrapping: callables run in the scheduling tick; a promise-valued
//! task (or callable return) is awaited inside a fresh fiber.

use crate::combinator::set::{Task, TaskSet, TaskValue};
use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::runtime::context;
use crate::runtime::event_loop::LoopHandle;
use crate::task;
use crate::types::{Reason, Settlement, TaskKey, TaskMap};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Runs every task with at most `limit` in flight; resolves with a mapping
/// of all values in input key order, or rejects with the first rejection.
///
/// Settlements of sibling tasks after the first rejection are ignored but
/// the siblings are not cancelled. A zero `limit` rejects with
/// `InvalidArgument`; empty input resolves with an empty mapping.
pub fn concurrent<T: Clone + Send + 'static>(
    tasks: TaskSet<T>,
    limit: usize,
) -> Promise<TaskMap<T>> {
    let lp = context::current_loop();
    pool_run(lp, tasks, limit, true).then(unwrap_fulfilled)
}

/// [`concurrent`] with the loop's configured default concurrency cap.
pub fn concurrent_default<T: Clone + Send + 'static>(tasks: TaskSet<T>) -> Promise<TaskMap<T>> {
    let lp = context::current_loop();
    let limit = lp.config().default_concurrency;
    pool_run(lp, tasks, limit, true).then(unwrap_fulfilled)
}

/// Like [`concurrent`], but never rejects: each task's outcome — including
/// errors raised while wrapping or constructing it — is recorded as a
/// settlement record at its original key.
pub fn concurrent_settled<T: Clone + Send + 'static>(
    tasks: TaskSet<T>,
    limit: usize,
) -> Promise<TaskMap<Settlement<T>>> {
    pool_run(context::current_loop(), tasks, limit, false)
}

/// Splits the input into consecutive chunks of `batch_size` and runs them
/// sequentially, each chunk through [`concurrent`] with `limit` (defaulting
/// to `batch_size`).
///
/// The next chunk starts only after the previous chunk has fully settled.
/// A rejection propagates immediately; no subsequent chunk is started.
pub fn batch<T: Clone + Send + 'static>(
    tasks: TaskSet<T>,
    batch_size: usize,
    limit: Option<usize>,
) -> Promise<TaskMap<T>> {
    let lp = context::current_loop();
    let limit = limit.unwrap_or(batch_size);
    batch_run(lp, tasks, batch_size, limit, true).then(unwrap_fulfilled)
}

/// Like [`batch`], but never rejects: every chunk runs and every task's
/// outcome is recorded as a settlement record.
pub fn batch_settled<T: Clone + Send + 'static>(
    tasks: TaskSet<T>,
    batch_size: usize,
    limit: Option<usize>,
) -> Promise<TaskMap<Settlement<T>>> {
    let lp = context::current_loop();
    let limit = limit.unwrap_or(batch_size);
    batch_run(lp, tasks, batch_size, limit, false)
}

fn unwrap_fulfilled<T>(records: TaskMap<Settlement<T>>) -> crate::Result<TaskMap<T>> {
    let mut map = TaskMap::with_capacity(records.len());
    for (key, settlement) in records.into_entries() {
        match settlement {
            Settlement::Fulfilled(value) => map.insert(key, value),
            // Unreachable under fail-fast, but never silently dropped.
            Settlement::Rejected(reason) => return Err(reason.into_error()),
        }
    }
    Ok(map)
}

// ============================================================================
// Pool
// ============================================================================

struct PoolState<T> {
    keys: Vec<TaskKey>,
    tasks: Vec<Option<Task<T>>>,
    records: Vec<Option<Settlement<T>>>,
    running: usize,
    completed: usize,
    next_index: usize,
    /// Set once the outer promise settles; later sibling settlements are
    /// ignored.
    finished: bool,
}

struct Pool<T> {
    lp: LoopHandle,
    limit: usize,
    fail_fast: bool,
    total: usize,
    resolver: Resolver<TaskMap<Settlement<T>>>,
    state: Mutex<PoolState<T>>,
}

fn pool_run<T: Clone + Send + 'static>(
    lp: LoopHandle,
    tasks: TaskSet<T>,
    limit: usize,
    fail_fast: bool,
) -> Promise<TaskMap<Settlement<T>>> {
    let (promise, resolver) = Promise::deferred_on(lp.clone());
    if limit == 0 {
        resolver.reject(Error::invalid_argument("concurrency limit must be positive"));
        return promise;
    }
    let entries = tasks.into_entries();
    if entries.is_empty() {
        resolver.resolve(TaskMap::new());
        return promise;
    }

    let total = entries.len();
    let mut keys = Vec::with_capacity(total);
    let mut slots = Vec::with_capacity(total);
    for (key, task) in entries {
        keys.push(key);
        slots.push(Some(task));
    }

    let pool = Arc::new(Pool {
        lp: lp.clone(),
        limit,
        fail_fast,
        total,
        resolver,
        state: Mutex::new(PoolState {
            keys,
            tasks: slots,
            records: (0..total).map(|_| None).collect(),
            running: 0,
            completed: 0,
            next_index: 0,
            finished: false,
        }),
    });

    tracing::debug!(total, limit, fail_fast, "dispatch pool starting");
    lp.next_tick(move || schedule_pass(&pool));
    promise
}

/// Starts tasks in input order while the in-flight count is under the cap.
fn schedule_pass<T: Clone + Send + 'static>(pool: &Arc<Pool<T>>) {
    loop {
        let next = {
            let mut state = pool.state.lock();
            if state.finished
                || state.running >= pool.limit
                || state.next_index >= pool.total
            {
                None
            } else {
                let index = state.next_index;
                state.next_index += 1;
                state.running += 1;
                state.tasks[index].take().map(|task| (index, task))
            }
        };
        let Some((index, task)) = next else { return };

        let input = execute(pool.lp.clone(), task);

        let on_ok = Arc::clone(pool);
        input.on_fulfilled(move |value| record(&on_ok, index, Settlement::Fulfilled(value)));

        let on_err = Arc::clone(pool);
        input.on_rejected(move |reason| record(&on_err, index, Settlement::Rejected(reason)));

        let on_gone = Arc::clone(pool);
        input.on_cancel(move || {
            record(
                &on_gone,
                index,
                Settlement::Rejected(Reason::Error(Error::cancelled())),
            );
        });
    }
}

/// Wraps one task for safe invocation.
///
/// Callables run here, in the scheduling tick; plain values complete
/// directly; promises are awaited inside a fresh fiber.
fn execute<T: Clone + Send + 'static>(lp: LoopHandle, task: Task<T>) -> Promise<T> {
    match task {
        Task::Ready(value) => Promise::resolved(value),
        Task::Promise(promise) => task::spawn_on(lp, move || task::wait(&promise)),
        Task::Call(call) => match std::panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(TaskValue::Value(value))) => Promise::resolved(value),
            Ok(Ok(TaskValue::Promise(promise))) => {
                task::spawn_on(lp, move || task::wait(&promise))
            }
            Ok(Err(e)) => Promise::rejected(e),
            Err(payload) => Promise::rejected(Error::from_panic(payload.as_ref())),
        },
    }
}

enum PoolOutcome<T> {
    Continue,
    Reject(Reason),
    Resolve(TaskMap<Settlement<T>>),
}

fn record<T: Clone + Send + 'static>(
    pool: &Arc<Pool<T>>,
    index: usize,
    settlement: Settlement<T>,
) {
    let outcome = {
        let mut state = pool.state.lock();
        if state.finished {
            return;
        }
        let failure = if pool.fail_fast {
            settlement.reason().cloned()
        } else {
            None
        };
        state.records[index] = Some(settlement);
        state.running -= 1;
        state.completed += 1;

        if let Some(reason) = failure {
            state.finished = true;
            PoolOutcome::Reject(reason)
        } else if state.completed == pool.total {
            state.finished = true;
            let keys = std::mem::take(&mut state.keys);
            let mut map = TaskMap::with_capacity(pool.total);
            for (key, slot) in keys.into_iter().zip(state.records.drain(..)) {
                if let Some(rec) = slot {
                    map.insert(key, rec);
                }
            }
            PoolOutcome::Resolve(map)
        } else {
            PoolOutcome::Continue
        }
    };

    match outcome {
        PoolOutcome::Continue => {
            let pool = Arc::clone(pool);
            let lp = pool.lp.clone();
            lp.next_tick(move || schedule_pass(&pool));
        }
        PoolOutcome::Reject(reason) => pool.resolver.reject(reason),
        PoolOutcome::Resolve(map) => pool.resolver.resolve(map),
    }
}

// ============================================================================
// Batch
// ============================================================================

struct BatchState<T> {
    chunks: VecDeque<TaskSet<T>>,
    acc: TaskMap<Settlement<T>>,
}

struct Batch<T> {
    lp: LoopHandle,
    limit: usize,
    fail_fast: bool,
    resolver: Resolver<TaskMap<Settlement<T>>>,
    state: Mutex<BatchState<T>>,
}

fn batch_run<T: Clone + Send + 'static>(
    lp: LoopHandle,
    tasks: TaskSet<T>,
    batch_size: usize,
    limit: usize,
    fail_fast: bool,
) -> Promise<TaskMap<Settlement<T>>> {
    let (promise, resolver) = Promise::deferred_on(lp.clone());
    if batch_size == 0 {
        resolver.reject(Error::invalid_argument("batch size must be positive"));
        return promise;
    }
    if limit == 0 {
        resolver.reject(Error::invalid_argument("concurrency limit must be positive"));
        return promise;
    }
    let chunks: VecDeque<TaskSet<T>> = tasks.into_chunks(batch_size).into();
    if chunks.is_empty() {
        resolver.resolve(TaskMap::new());
        return promise;
    }

    let batch = Arc::new(Batch {
        lp,
        limit,
        fail_fast,
        resolver,
        state: Mutex::new(BatchState {
            chunks,
            acc: TaskMap::new(),
        }),
    });
    run_chunk(&batch);
    promise
}

/// Runs the next chunk; resolves the accumulated map when none remain.
fn run_chunk<T: Clone + Send + 'static>(batch: &Arc<Batch<T>>) {
    let chunk = batch.state.lock().chunks.pop_front();
    let Some(chunk) = chunk else {
        let acc = std::mem::take(&mut batch.state.lock().acc);
        batch.resolver.resolve(acc);
        return;
    };

    let chunk_promise = pool_run(batch.lp.clone(), chunk, batch.limit, batch.fail_fast);

    let next = Arc::clone(batch);
    chunk_promise.on_fulfilled(move |records| {
        next.state.lock().acc.extend_from(records);
        let again = Arc::clone(&next);
        next.lp.next_tick(move || run_chunk(&again));
    });

    let on_fail = Arc::clone(batch);
    chunk_promise.on_rejected(move |reason| on_fail.resolver.reject(reason));

    let on_gone = Arc::clone(batch);
    chunk_promise.on_cancel(move || on_gone.resolver.cancel());
}
