//! A `u64` queue that records its own history for property checking.
//!
//! # Invariants
//!
//! | Property | Verified By |
//! |----------|-------------|
//! | NoLostElements | DST, loom, stateright |
//! | NoDuplicates | DST, loom, stateright |
//! | NoFabrication | DST, stateright |
//! | PerProducerOrder | DST, stress, stateright |

use std::collections::HashSet;
use std::ptr::{self, NonNull};
use std::sync::{Mutex, MutexGuard};

use imq_core::invariants::queue::{QueueHistory, QueueProperties};

use crate::anchor::Anchor;
use crate::cursor::{walk_chain, Cursor, TryPopError};
use crate::links::{Linked, Links};

/// Consumer id recorded in the history for every pop.
pub const CONSUMER_ID: u64 = u64::MAX;

/// A heap-allocated queue node carrying a producer id and a value.
#[derive(Debug)]
pub struct Entry {
    links: Links<Entry>,
    /// Id of the producer that pushed this entry.
    pub producer: u64,
    /// Payload. Unique across producers when used with [`TrackedQueue`].
    pub value: u64,
}

impl Entry {
    /// Allocate a fresh, unlinked entry.
    #[must_use]
    pub fn new(producer: u64, value: u64) -> Box<Self> {
        Box::new(Self {
            links: Links::new(),
            producer,
            value,
        })
    }
}

unsafe impl Linked for Entry {
    type Handle = Box<Entry>;

    fn into_ptr(handle: Box<Entry>) -> NonNull<Entry> {
        NonNull::from(Box::leak(handle))
    }

    unsafe fn from_ptr(ptr: NonNull<Entry>) -> Box<Entry> {
        Box::from_raw(ptr.as_ptr())
    }

    unsafe fn links(ptr: NonNull<Entry>) -> NonNull<Links<Entry>> {
        NonNull::new_unchecked(ptr::addr_of_mut!((*ptr.as_ptr()).links))
    }
}

/// Tracking state for property verification.
#[derive(Default)]
pub(crate) struct Tracker {
    pushed: HashSet<u64>,
    popped: Vec<u64>,
    history: QueueHistory,
    step: u64,
}

impl Tracker {
    fn next_step(&mut self) -> u64 {
        self.step += 1;
        self.step
    }

    pub(crate) fn record_push(&mut self, producer: u64, value: u64) {
        self.pushed.insert(value);
        let step = self.next_step();
        self.history.record_push(producer, value, step);
    }

    pub(crate) fn record_pop(&mut self, result: Result<u64, TryPopError>) {
        let step = self.next_step();
        match result {
            Ok(value) => {
                self.popped.push(value);
                self.history.record_pop(CONSUMER_ID, value, step);
            }
            Err(e) => {
                self.history
                    .record_pop_none(CONSUMER_ID, e == TryPopError::Inconsistent, step);
            }
        }
    }

    pub(crate) fn pushed(&self) -> HashSet<u64> {
        self.pushed.clone()
    }

    pub(crate) fn popped(&self) -> Vec<u64> {
        self.popped.clone()
    }

    pub(crate) fn history(&self) -> QueueHistory {
        self.history.clone()
    }
}

/// Lock a mutex, ignoring poisoning from a panicked test thread.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// An [`Anchor`] plus a lock-guarded [`Cursor`], recording every operation.
///
/// The cursor lock only serializes pops against each other; pushes never
/// take it. The tracker lock is taken after each queue operation, so the
/// recorded history is exact only for operations on a single thread or
/// once the queue is quiescent.
pub struct TrackedQueue {
    anchor: Anchor<Entry>,
    cursor: Mutex<Cursor<Entry>>,
    tracker: Mutex<Tracker>,
}

impl TrackedQueue {
    /// Create a new empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Anchor::new(),
            cursor: Mutex::new(Cursor::new()),
            tracker: Mutex::new(Tracker::default()),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        lock(&self.tracker)
    }

    fn cursor(&self) -> MutexGuard<'_, Cursor<Entry>> {
        lock(&self.cursor)
    }

    /// Push `value` on behalf of `producer`.
    pub fn push(&self, producer: u64, value: u64) {
        self.anchor.push(Entry::new(producer, value));
        self.tracker().record_push(producer, value);
    }

    /// Pop the next value, distinguishing empty from inconsistent.
    pub fn try_pop(&self) -> Result<u64, TryPopError> {
        // Safety: the cursor is only reachable through this lock and is
        // always paired with `self.anchor`.
        let result = unsafe { self.cursor().try_pop(&self.anchor) }.map(|entry| entry.value);
        self.tracker().record_pop(result);
        result
    }

    /// Pop the next value, if one can be handed out now.
    pub fn pop(&self) -> Option<u64> {
        self.try_pop().ok()
    }

    /// Best-effort emptiness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.cursor().is_holding() && self.anchor.is_idle()
    }

    /// Values still in the queue, consumer end first.
    ///
    /// Only meaningful while no push is in flight.
    #[must_use]
    pub fn get_contents(&self) -> Vec<u64> {
        let cursor = self.cursor();
        let mut contents = Vec::new();
        // Safety: nodes on the chain are owned by the queue and freed only
        // by a pop, which needs the cursor lock held here.
        unsafe {
            walk_chain(cursor.local_head(), &self.anchor, |node| {
                contents.push(node.as_ref().value)
            })
        };
        contents
    }
}

impl Default for TrackedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TrackedQueue {
    fn drop(&mut self) {
        let cursor = self.cursor.get_mut().unwrap_or_else(|e| e.into_inner());
        // Safety: `&mut self` rules out any concurrent push or pop.
        while unsafe { cursor.try_pop(&self.anchor) }.is_ok() {}
    }
}

impl QueueProperties for TrackedQueue {
    fn pushed_elements(&self) -> HashSet<u64> {
        self.tracker().pushed()
    }

    fn popped_elements(&self) -> Vec<u64> {
        self.tracker().popped()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.get_contents()
    }

    fn history(&self) -> QueueHistory {
        self.tracker().history()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use imq_core::invariants::queue::{QueueOpType, QueuePropertyChecker};
    use imq_core::PropertyChecker;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_invariants_basic() {
        let queue = TrackedQueue::new();
        queue.push(0, 1);
        queue.push(1, 100);
        queue.push(0, 2);
        assert_eq!(queue.pop(), Some(1));

        let checker = QueuePropertyChecker::new(&queue);
        assert!(checker.all_hold(), "{:?}", checker.first_violation());
        assert_eq!(queue.get_contents(), vec![100, 2]);
    }

    #[test]
    fn test_history_records_empty_pops() {
        let queue = TrackedQueue::new();
        assert_eq!(queue.try_pop(), Err(TryPopError::Empty));
        queue.push(3, 9);
        assert_eq!(queue.pop(), Some(9));
        assert_eq!(queue.pop(), None);

        let history = queue.history();
        let ops: Vec<QueueOpType> = history.operations.iter().map(|op| op.op_type).collect();
        assert_eq!(
            ops,
            vec![
                QueueOpType::PopEmpty,
                QueueOpType::Push,
                QueueOpType::Pop,
                QueueOpType::PopEmpty
            ]
        );
        assert_eq!(history.empty_pops(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_random_ops_keep_invariants() {
        let seed = std::env::var("DST_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0x5eed);
        let mut rng = StdRng::seed_from_u64(seed);
        let queue = TrackedQueue::new();
        let checker = QueuePropertyChecker::new(&queue).with_seed(seed);
        let mut next_value = 1;

        for _ in 0..2000 {
            match rng.gen_range(0..4_u8) {
                0 | 1 => {
                    queue.push(rng.gen_range(0..3), next_value);
                    next_value += 1;
                }
                2 => {
                    queue.pop();
                }
                _ => assert!(checker.all_hold(), "Invariant violated with DST_SEED={}", seed),
            }
        }

        while queue.pop().is_some() {}
        assert!(checker.all_hold(), "Final check failed with DST_SEED={}", seed);
        assert_eq!(queue.popped_elements().len() as u64, next_value - 1);
    }

    #[test]
    fn test_concurrent_then_quiescent_check() {
        let queue = Arc::new(TrackedQueue::new());
        let handles: Vec<_> = (0..4u64)
            .map(|p| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        q.push(p, p * 1000 + i);
                    }
                })
            })
            .collect();

        let mut popped = 0;
        for _ in 0..500 {
            if queue.pop().is_some() {
                popped += 1;
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        while queue.pop().is_some() {
            popped += 1;
        }

        assert_eq!(popped, 1000);
        assert!(QueuePropertyChecker::new(queue.as_ref()).all_hold());
    }
}
