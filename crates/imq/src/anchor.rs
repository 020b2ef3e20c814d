//! The shared, producer-facing half of the queue.
//!
//! # Push protocol
//!
//! ```text
//!   reset(node.next)                     Relaxed
//!   prior = swap(tail, node)             AcqRel
//!   prior == null ? store(head, node)    Release   (empty -> non-empty)
//!                 : store(prior.next, node) Release
//! ```
//!
//! The swap on `tail` linearizes every push. Each producer receives a
//! distinct `prior`, so each link is written by exactly one producer,
//! exactly once. A push that finds `tail` empty has no predecessor to link
//! to and announces its node through the `head` hand-off slot instead.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use crossbeam_utils::CachePadded;

use crate::links::{next_of, Linked};
use crate::loom::sync::atomic::{AtomicPtr, Ordering};

/// State shared by every producer and read by the consumer.
///
/// An `Anchor` never allocates and never frees: nodes come in as
/// `T::Handle`s through [`push`](Anchor::push) and go back out through a
/// [`Cursor`](crate::Cursor).
pub struct Anchor<T: Linked> {
    /// The most recently linked node, or null.
    tail: CachePadded<AtomicPtr<T>>,
    /// Hand-off slot, non-null only between an empty -> non-empty push and
    /// the consumer's claim.
    head: CachePadded<AtomicPtr<T>>,
    _handles: PhantomData<T::Handle>,
}

// Safety: the anchor moves `T::Handle`s between threads and never hands
// out shared references to a node.
unsafe impl<T: Linked> Send for Anchor<T> where T::Handle: Send {}
unsafe impl<T: Linked> Sync for Anchor<T> where T::Handle: Send {}

impl<T: Linked> Anchor<T> {
    /// Returns an empty anchor.
    #[cfg(not(loom))]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tail: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            _handles: PhantomData,
        }
    }

    /// Returns an empty anchor.
    #[cfg(loom)]
    #[must_use]
    pub fn new() -> Self {
        Self {
            tail: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            _handles: PhantomData,
        }
    }

    /// Append a node. Never blocks, never fails, never allocates.
    pub fn push(&self, handle: T::Handle) {
        self.reserve_slot(handle).commit();
    }

    /// Claim the tail slot for `handle` without linking it yet.
    ///
    /// Until the returned [`Reservation`] is committed (or dropped) the
    /// queue sits in the window where the node owns `tail` but is not
    /// reachable from its predecessor.
    #[cfg(feature = "sim")]
    pub fn reserve(&self, handle: T::Handle) -> Reservation<'_, T> {
        self.reserve_slot(handle)
    }

    /// Best-effort emptiness: true if no node is the end of an active chain.
    ///
    /// A concurrent push may make this stale before the caller reads it.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tail.load(Ordering::Acquire).is_null()
    }

    pub(crate) fn reserve_slot(&self, handle: T::Handle) -> Reservation<'_, T> {
        let node = T::into_ptr(handle);
        // Safety: we own `node` until the swap below publishes it.
        unsafe { next_of(node) }.store(ptr::null_mut(), Ordering::Relaxed);
        // Acquire the prior node's reset link before writing it, and release
        // ours to the close CAS; the link or head store publishes the node.
        let prior = self.tail.swap(node.as_ptr(), Ordering::AcqRel);
        Reservation {
            anchor: self,
            node,
            prior: NonNull::new(prior),
            linked: false,
        }
    }

    /// Take whatever the hand-off slot holds.
    pub(crate) fn claim_handoff(&self) -> Option<NonNull<T>> {
        NonNull::new(self.head.swap(ptr::null_mut(), Ordering::Acquire))
    }

    /// Close the chain if `last` is still the tail.
    ///
    /// Fails when a producer has already swapped `tail` past `last`; that
    /// producer is about to write `last`'s link.
    pub(crate) fn close(&self, last: NonNull<T>) -> bool {
        self.tail
            .compare_exchange(
                last.as_ptr(),
                ptr::null_mut(),
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Peek at the hand-off slot without claiming it.
    pub(crate) fn handoff_peek(&self) -> Option<NonNull<T>> {
        NonNull::new(self.head.load(Ordering::Acquire))
    }
}

impl<T: Linked> Default for Anchor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked> fmt::Debug for Anchor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anchor")
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("head", &self.head.load(Ordering::Relaxed))
            .finish()
    }
}

/// A push that has swapped `tail` but not yet linked its node.
///
/// Committing (or dropping) the reservation performs the link, so a node
/// can never be left half-pushed.
#[must_use = "a reservation links its node when committed or dropped"]
pub struct Reservation<'a, T: Linked> {
    anchor: &'a Anchor<T>,
    node: NonNull<T>,
    prior: Option<NonNull<T>>,
    linked: bool,
}

impl<T: Linked> Reservation<'_, T> {
    /// True if this push found the queue empty and will publish through
    /// the hand-off slot.
    #[must_use]
    pub fn is_handoff(&self) -> bool {
        self.prior.is_none()
    }

    /// Link the node and finish the push.
    pub fn commit(mut self) {
        self.link();
    }

    fn link(&mut self) {
        if self.linked {
            return;
        }
        self.linked = true;
        match self.prior {
            None => self.anchor.head.store(self.node.as_ptr(), Ordering::Release),
            // Safety: `prior` cannot have been handed to the consumer yet. The
            // consumer only returns a node once its link is non-null or once
            // it closed `tail` on it, and our swap made both impossible.
            Some(prior) => {
                let link = unsafe { next_of(prior) };
                link.store(self.node.as_ptr(), Ordering::Release);
            }
        }
    }
}

impl<T: Linked> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        self.link();
    }
}

impl<T: Linked> fmt::Debug for Reservation<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("node", &self.node)
            .field("prior", &self.prior)
            .field("linked", &self.linked)
            .finish()
    }
}
