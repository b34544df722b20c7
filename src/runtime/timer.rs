//! Timer heap for due-time management.
//!
//! A min-heap of `(due, generation)` pairs drives timer callbacks. Ties on
//! the due-time break by insertion order. Cancellation is lazy: the callback
//! is dropped immediately, the heap entry is skimmed off on the next peek
//! or pop.

use crate::types::{Time, TimerId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TimerEntry {
    due: Time,
    generation: u64,
    id: TimerId,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest due-time first).
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by due-time.
#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    callbacks: HashMap<TimerId, TimerCallback>,
    next_generation: u64,
}

impl TimerHeap {
    /// Creates a new empty timer heap.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live (non-cancelled) timers.
    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Returns true if no live timers remain.
    pub(crate) fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Adds a timer due at `due`, returning its cancellation handle.
    pub(crate) fn insert(&mut self, due: Time, callback: TimerCallback) -> TimerId {
        let id = TimerId::next();
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            due,
            generation,
            id,
        });
        self.callbacks.insert(id, callback);
        id
    }

    /// Cancels a timer if it is still pending. Returns whether it was.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    /// Returns the earliest live due-time, if any.
    ///
    /// Skims cancelled entries off the top of the heap.
    pub(crate) fn peek_deadline(&mut self) -> Option<Time> {
        while let Some(entry) = self.heap.peek() {
            if self.callbacks.contains_key(&entry.id) {
                return Some(entry.due);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops the callbacks of all timers due at or before `now`,
    /// in (due, insertion) order.
    pub(crate) fn pop_expired(&mut self, now: Time) -> Vec<TimerCallback> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.due > now {
                break;
            }
            let entry = *entry;
            self.heap.pop();
            if let Some(callback) = self.callbacks.remove(&entry.id) {
                expired.push(callback);
            }
        }
        expired
    }

    /// Drops all timers.
    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.callbacks.clear();
    }
}

impl std::fmt::Debug for TimerHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHeap")
            .field("live", &self.callbacks.len())
            .field("heap", &self.heap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn empty_heap_has_no_deadline() {
        let mut heap = TimerHeap::new();
        assert!(heap.is_empty());
        assert_eq!(heap.peek_deadline(), None);
    }

    #[test]
    fn peek_returns_earliest_due() {
        let mut heap = TimerHeap::new();
        heap.insert(Time::from_millis(200), Box::new(|| {}));
        heap.insert(Time::from_millis(100), Box::new(|| {}));
        heap.insert(Time::from_millis(150), Box::new(|| {}));

        assert_eq!(heap.peek_deadline(), Some(Time::from_millis(100)));
    }

    #[test]
    fn pop_expired_fires_in_due_then_insertion_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let push = |tag: &'static str| {
            let order = Arc::clone(&order);
            Box::new(move || order.lock().push(tag)) as TimerCallback
        };

        let mut heap = TimerHeap::new();
        heap.insert(Time::from_millis(100), push("first-at-100"));
        heap.insert(Time::from_millis(50), push("at-50"));
        heap.insert(Time::from_millis(100), push("second-at-100"));

        for cb in heap.pop_expired(Time::from_millis(100)) {
            cb();
        }
        assert_eq!(
            *order.lock(),
            ["at-50", "first-at-100", "second-at-100"]
        );
        assert!(heap.is_empty());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut heap = TimerHeap::new();
        let counter = Arc::clone(&fired);
        let id = heap.insert(
            Time::from_millis(10),
            Box::new(move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );

        assert!(heap.cancel(id));
        assert!(!heap.cancel(id));
        assert!(heap.pop_expired(Time::from_millis(20)).is_empty());
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn cancelled_head_does_not_mask_deadline() {
        let mut heap = TimerHeap::new();
        let early = heap.insert(Time::from_millis(10), Box::new(|| {}));
        heap.insert(Time::from_millis(30), Box::new(|| {}));

        heap.cancel(early);
        assert_eq!(heap.peek_deadline(), Some(Time::from_millis(30)));
        assert_eq!(heap.len(), 1);
    }
}
