//! The consumer-private half of the queue.
//!
//! # Pop protocol
//!
//! ```text
//!   cursor == null ?  load(head) == null -> Empty            Acquire
//!                     cursor = swap(head, null)              Acquire
//!   next = load(cursor.next)                                 Acquire
//!   next == null   ?  cas(tail, cursor, null)                Release / Relaxed
//!                       fails -> Inconsistent, keep cursor
//!   result = cursor; cursor = next; return result
//! ```
//!
//! Most pops touch no shared state beyond the link of the node being
//! returned. The anchor is consulted only when the local chain runs dry.
//!
//! When the closing CAS fails, a producer has swapped `tail` past the
//! current node and is about to write its link. The node is kept back
//! until that link lands: handing it out earlier would let the producer
//! write into memory the caller already owns, and would leave the
//! successor reachable from nowhere.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use crate::anchor::Anchor;
use crate::links::{next_of, Linked};
use crate::loom::sync::atomic::Ordering;

/// Errors returned by [`Cursor::try_pop`] and [`Consumer::try_pop`].
///
/// Neither is a failure of the queue; both mean "nothing to hand out right
/// now".
///
/// [`Consumer::try_pop`]: crate::Consumer::try_pop
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryPopError {
    /// No node is visible to the consumer.
    #[error("queue is empty")]
    Empty,

    /// A producer has claimed the tail slot but not yet linked its node.
    ///
    /// The window is a handful of instructions wide; retrying shortly
    /// will make progress once the producer is scheduled.
    #[error("queue is inconsistent: a producer is still linking its node")]
    Inconsistent,
}

/// The consumer's private position in the queue.
///
/// A cursor holds no atomics. It must be paired with exactly one
/// [`Anchor`] for its whole life, and only one cursor may exist per
/// anchor. [`queue`](crate::queue) builds a pair that upholds this by
/// construction.
pub struct Cursor<T: Linked> {
    /// Next node to return, or null once the local chain is exhausted.
    head: *mut T,
    _handles: PhantomData<T::Handle>,
}

// Safety: a cursor is a unique owner of the nodes on its local chain.
unsafe impl<T: Linked> Send for Cursor<T> where T::Handle: Send {}

impl<T: Linked> Cursor<T> {
    /// Returns a cursor with an empty local chain.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            _handles: PhantomData,
        }
    }

    /// Pop the next node, distinguishing why nothing was returned.
    ///
    /// # Safety
    ///
    /// - `anchor` must be the same anchor on every call for this cursor.
    /// - No other cursor may pop from `anchor`, ever.
    pub unsafe fn try_pop(&mut self, anchor: &Anchor<T>) -> Result<T::Handle, TryPopError> {
        let current = match NonNull::new(self.head) {
            Some(current) => current,
            None => {
                if anchor.handoff_peek().is_none() {
                    return Err(TryPopError::Empty);
                }
                // Single consumer: nobody else can have emptied the slot
                // since the load above.
                let claimed = anchor.claim_handoff().ok_or(TryPopError::Empty)?;
                self.head = claimed.as_ptr();
                claimed
            }
        };

        let next = next_of(current).load(Ordering::Acquire);
        if next.is_null() && !anchor.close(current) {
            return Err(TryPopError::Inconsistent);
        }

        self.head = next;
        Ok(T::from_ptr(current))
    }

    /// Pop the next node, or `None` if nothing can be handed out now.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_pop`](Cursor::try_pop).
    pub unsafe fn pop(&mut self, anchor: &Anchor<T>) -> Option<T::Handle> {
        self.try_pop(anchor).ok()
    }

    /// True if the cursor still holds claimed nodes.
    #[must_use]
    pub fn is_holding(&self) -> bool {
        !self.head.is_null()
    }

    /// The node the next pop will return, if the cursor already holds it.
    ///
    /// Intended for inspecting a quiescent queue; the pointer must not be
    /// dereferenced while a push may be linking it.
    #[must_use]
    pub fn local_head(&self) -> Option<NonNull<T>> {
        NonNull::new(self.head)
    }
}

impl<T: Linked> Default for Cursor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor").field("head", &self.head).finish()
    }
}

/// Visit every node still owed to the consumer, starting at `local_head`
/// (the cursor's position) or, if that is `None`, at the hand-off slot.
///
/// # Safety
///
/// No push may be in flight and every node on the chain must stay live
/// for the duration of the walk.
pub unsafe fn walk_chain<T: Linked>(
    local_head: Option<NonNull<T>>,
    anchor: &Anchor<T>,
    mut visit: impl FnMut(NonNull<T>),
) {
    let mut current = local_head.or_else(|| anchor.handoff_peek());
    while let Some(node) = current {
        visit(node);
        current = NonNull::new(next_of(node).load(Ordering::Acquire));
    }
}
