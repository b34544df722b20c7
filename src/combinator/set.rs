//! Combinator inputs.
//!
//! Every combinator accepts a [`TaskSet`]: an ordered, keyed collection in
//! which each entry is a ready value, a promise, or a zero-argument callable
//! producing either. Callables are invoked exactly once; their returns are
//! adopted.

use crate::error::Result;
use crate::promise::Promise;
use crate::types::TaskKey;

/// What a callable task may produce.
pub enum TaskValue<T> {
    /// A plain value, returned directly.
    Value(T),
    /// A promise to adopt.
    Promise(Promise<T>),
}

type TaskCall<T> = Box<dyn FnOnce() -> Result<TaskValue<T>> + Send + 'static>;

/// A single combinator input.
pub enum Task<T> {
    /// A value that is already available.
    Ready(T),
    /// A promise given directly.
    Promise(Promise<T>),
    /// A callable invoked once when the task is dispatched.
    Call(TaskCall<T>),
}

impl<T> Task<T> {
    /// Wraps a ready value.
    #[must_use]
    pub fn value(value: T) -> Self {
        Self::Ready(value)
    }

    /// Wraps an existing promise.
    #[must_use]
    pub fn promise(promise: Promise<T>) -> Self {
        Self::Promise(promise)
    }

    /// Wraps a callable producing a value or a promise.
    ///
    /// An `Err` return counts as the task's rejection.
    #[must_use]
    pub fn from_fn(call: impl FnOnce() -> Result<TaskValue<T>> + Send + 'static) -> Self {
        Self::Call(Box::new(call))
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Materializes this task into a promise, invoking a callable now.
    ///
    /// Used by the collection combinators, which dispatch every input at
    /// call time. The concurrency combinators dispatch lazily instead.
    pub(crate) fn into_promise_now(self) -> Promise<T> {
        match self {
            Self::Ready(value) => Promise::resolved(value),
            Self::Promise(promise) => promise,
            Self::Call(call) => match call() {
                Ok(TaskValue::Value(value)) => Promise::resolved(value),
                Ok(TaskValue::Promise(promise)) => promise,
                Err(e) => Promise::rejected(e),
            },
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Task::Ready"),
            Self::Promise(_) => f.write_str("Task::Promise"),
            Self::Call(_) => f.write_str("Task::Call"),
        }
    }
}

impl<T> From<Promise<T>> for Task<T> {
    fn from(promise: Promise<T>) -> Self {
        Self::Promise(promise)
    }
}

/// The ordered, keyed input collection for combinators.
///
/// Pushed entries get dense positional keys; named entries keep their names
/// byte-identical. Key order here is key order in every combinator result.
#[derive(Debug)]
pub struct TaskSet<T> {
    entries: Vec<(TaskKey, Task<T>)>,
}

impl<T> Default for TaskSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a task under the next positional key.
    pub fn push(&mut self, task: impl Into<Task<T>>) {
        let key = TaskKey::Index(self.entries.len());
        self.entries.push((key, task.into()));
    }

    /// Appends a task under an explicit key.
    pub fn insert(&mut self, key: impl Into<TaskKey>, task: impl Into<Task<T>>) {
        self.entries.push((key.into(), task.into()));
    }

    /// Builder form of [`TaskSet::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<TaskKey>, task: impl Into<Task<T>>) -> Self {
        self.insert(key, task);
        self
    }

    /// Snapshots the keys in input order.
    #[must_use]
    pub fn keys(&self) -> Vec<TaskKey> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Consumes the set, yielding `(key, task)` pairs in input order.
    #[must_use]
    pub fn into_entries(self) -> Vec<(TaskKey, Task<T>)> {
        self.entries
    }

    /// Splits the set into consecutive chunks of at most `size` entries,
    /// preserving keys. The last chunk may be shorter.
    #[must_use]
    pub(crate) fn into_chunks(self, size: usize) -> Vec<Self> {
        let mut chunks = Vec::new();
        let mut current = Self::new();
        for entry in self.entries {
            current.entries.push(entry);
            if current.entries.len() == size {
                chunks.push(std::mem::take(&mut current));
            }
        }
        if !current.entries.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

impl<T, U: Into<Task<T>>> FromIterator<U> for TaskSet<T> {
    fn from_iter<I: IntoIterator<Item = U>>(iter: I) -> Self {
        let mut set = Self::new();
        for task in iter {
            set.push(task);
        }
        set
    }
}

impl<T> From<Vec<Promise<T>>> for TaskSet<T> {
    fn from(promises: Vec<Promise<T>>) -> Self {
        promises.into_iter().collect()
    }
}
