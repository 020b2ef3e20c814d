//! A safe producer/consumer pair over one anchor and one cursor.

use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::marker::PhantomData;

use crate::anchor::Anchor;
use crate::cursor::{Cursor, TryPopError};
use crate::links::Linked;
use crate::loom::sync::Arc;

/// Create a queue and return its two ends.
///
/// The [`Producer`] can be cloned and shared freely. The [`Consumer`] is
/// unique, which is what makes its pop operations safe.
///
/// ```
/// use std::ptr::NonNull;
/// use imq::{Linked, Links};
///
/// struct Job {
///     links: Links<Job>,
///     id: u32,
/// }
///
/// unsafe impl Linked for Job {
///     type Handle = Box<Job>;
///
///     fn into_ptr(handle: Box<Job>) -> NonNull<Job> {
///         unsafe { NonNull::new_unchecked(Box::into_raw(handle)) }
///     }
///
///     unsafe fn from_ptr(ptr: NonNull<Job>) -> Box<Job> {
///         Box::from_raw(ptr.as_ptr())
///     }
///
///     unsafe fn links(ptr: NonNull<Job>) -> NonNull<Links<Job>> {
///         NonNull::new_unchecked(std::ptr::addr_of_mut!((*ptr.as_ptr()).links))
///     }
/// }
///
/// let (tx, mut rx) = imq::queue::<Job>();
/// tx.push(Box::new(Job { links: Links::new(), id: 7 }));
/// assert_eq!(rx.pop().map(|job| job.id), Some(7));
/// assert!(rx.pop().is_none());
/// ```
#[must_use]
pub fn queue<T: Linked>() -> (Producer<T>, Consumer<T>) {
    let shared = Arc::new(Shared {
        anchor: Anchor::new(),
        cursor: UnsafeCell::new(Cursor::new()),
    });
    let producer = Producer {
        shared: Arc::clone(&shared),
    };
    let consumer = Consumer {
        shared,
        _not_sync: PhantomData,
    };
    (producer, consumer)
}

struct Shared<T: Linked> {
    anchor: Anchor<T>,
    /// Only ever touched through the unique `Consumer`, or in `drop`.
    cursor: UnsafeCell<Cursor<T>>,
}

// Safety: the cursor cell is reached only through `&mut Consumer` or
// `&mut self` in `drop`; everything else is the anchor, which is `Sync`.
unsafe impl<T: Linked> Send for Shared<T> where T::Handle: Send {}
unsafe impl<T: Linked> Sync for Shared<T> where T::Handle: Send {}

impl<T: Linked> Drop for Shared<T> {
    fn drop(&mut self) {
        // Both ends are gone, so every push has finished linking.
        let cursor = self.cursor.get_mut();
        // Safety: this cursor has only ever been paired with this anchor.
        while let Ok(handle) = unsafe { cursor.try_pop(&self.anchor) } {
            drop(handle);
        }
    }
}

/// The sending end of a [`queue`].
pub struct Producer<T: Linked> {
    shared: Arc<Shared<T>>,
}

impl<T: Linked> Producer<T> {
    /// Append a node. Never blocks and never fails.
    pub fn push(&self, handle: T::Handle) {
        self.shared.anchor.push(handle);
    }

    /// Best-effort emptiness as seen by producers.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.anchor.is_idle()
    }
}

impl<T: Linked> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Linked> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("anchor", &self.shared.anchor)
            .finish()
    }
}

/// The receiving end of a [`queue`]. There is exactly one per queue.
///
/// A `Consumer` can move to another thread but cannot be shared between
/// threads:
///
/// ```compile_fail
/// fn shared_between_threads<S: Sync>(_: &S) {}
///
/// let (_tx, rx) = imq::queue::<imq::Entry>();
/// shared_between_threads(&rx);
/// ```
pub struct Consumer<T: Linked> {
    shared: Arc<Shared<T>>,
    // `is_idle` reads the cursor through `&self`.
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Linked> Consumer<T> {
    /// Pop the next node, or report why there is none.
    pub fn try_pop(&mut self) -> Result<T::Handle, TryPopError> {
        let shared = &*self.shared;
        // Safety: `&mut self` on the unique consumer is exclusive access to
        // the cursor, and it is always paired with this anchor.
        unsafe { (*shared.cursor.get()).try_pop(&shared.anchor) }
    }

    /// Pop the next node, or `None` if nothing can be handed out now.
    ///
    /// `None` may be spurious while a producer is between claiming its slot
    /// and linking its node.
    pub fn pop(&mut self) -> Option<T::Handle> {
        self.try_pop().ok()
    }

    /// Pop until the queue reports nothing to hand out.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { consumer: self }
    }

    /// True if neither the consumer nor the producers hold queued nodes.
    ///
    /// Best-effort: a concurrent push may make this stale immediately.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        // Safety: `Consumer` is not `Sync`, so no `&mut self` call can run
        // concurrently with this read.
        let holding = unsafe { (*self.shared.cursor.get()).is_holding() };
        !holding && self.shared.anchor.is_idle()
    }

    /// Another producer for this queue.
    #[must_use]
    pub fn producer(&self) -> Producer<T> {
        Producer {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Linked> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("anchor", &self.shared.anchor)
            .finish_non_exhaustive()
    }
}

/// Iterator returned by [`Consumer::drain`].
#[derive(Debug)]
pub struct Drain<'a, T: Linked> {
    consumer: &'a mut Consumer<T>,
}

impl<T: Linked> Iterator for Drain<'_, T> {
    type Item = T::Handle;

    fn next(&mut self) -> Option<T::Handle> {
        self.consumer.pop()
    }
}


/// Loom tests - these exhaustively check all interleavings
#[cfg(loom)]
mod loom_tests {
    use super::*;
    use crate::tracked::Entry;
    use loom::thread;

    fn drain_values(rx: &mut Consumer<Entry>) -> Vec<u64> {
        rx.drain().map(|e| e.value).collect()
    }

    #[test]
    fn test_push_push_into_empty() {
        loom::model(|| {
            let (tx, mut rx) = queue::<Entry>();
            let tx2 = tx.clone();

            let h1 = thread::spawn(move || tx.push(Entry::new(0, 1)));
            let h2 = thread::spawn(move || tx2.push(Entry::new(1, 2)));
            h1.join().unwrap();
            h2.join().unwrap();

            // Both pushes have finished: no spurious empty allowed.
            let mut values = drain_values(&mut rx);
            values.sort_unstable();
            assert_eq!(values, vec![1, 2]);
            assert!(rx.is_idle());
        });
    }

    #[test]
    fn test_push_while_popping() {
        loom::model(|| {
            let (tx, mut rx) = queue::<Entry>();
            tx.push(Entry::new(0, 1));

            let h = thread::spawn(move || {
                tx.push(Entry::new(0, 2));
                tx.push(Entry::new(0, 3));
            });

            let mut values = Vec::new();
            for _ in 0..2 {
                match rx.try_pop() {
                    Ok(e) => values.push(e.value),
                    Err(_) => thread::yield_now(),
                }
            }
            h.join().unwrap();
            values.extend(drain_values(&mut rx));

            assert_eq!(values, vec![1, 2, 3], "Lost, duplicated or reordered");
        });
    }

    #[test]
    fn test_race_window_never_hands_out_owed_node() {
        loom::model(|| {
            let (tx, mut rx) = queue::<Entry>();
            tx.push(Entry::new(0, 1));

            let h = thread::spawn(move || tx.push(Entry::new(1, 2)));

            let mut values = Vec::new();
            for _ in 0..2 {
                match rx.try_pop() {
                    Ok(e) => values.push(e.value),
                    Err(TryPopError::Inconsistent) => {
                        // Only node 1 can be owed a link, and it stays
                        // with the consumer until the link lands.
                        assert!(values.is_empty());
                        assert!(!rx.is_idle());
                        thread::yield_now();
                    }
                    Err(TryPopError::Empty) => thread::yield_now(),
                }
            }
            h.join().unwrap();
            values.extend(drain_values(&mut rx));

            assert_eq!(values, vec![1, 2]);
            assert!(rx.is_idle());
        });
    }

    #[test]
    fn test_drop_with_queued_nodes() {
        loom::model(|| {
            let (tx, rx) = queue::<Entry>();
            let tx2 = tx.clone();

            let h = thread::spawn(move || {
                tx2.push(Entry::new(1, 10));
                tx2.push(Entry::new(1, 11));
            });
            tx.push(Entry::new(0, 1));
            h.join().unwrap();

            // Dropping both ends frees the three queued nodes.
            drop(rx);
            drop(tx);
        });
    }
}
