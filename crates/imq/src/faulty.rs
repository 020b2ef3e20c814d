//! Deliberately broken queue variants the checkers must catch.
//!
//! # Bug Catalog
//!
//! | Implementation | Bug | Caught By |
//! |----------------|-----|-----------|
//! | OverwritingHandoffQueue | Every push publishes to `head`, ignoring `prior` | NoLostElements |
//! | ReturnOnCasFailureCursor | Pop hands out its node when the close fails | DST, stateright |

use std::collections::HashSet;
use std::ptr::{self, NonNull};
use std::sync::Mutex;

use imq_core::invariants::queue::{QueueHistory, QueueProperties};

use crate::anchor::Anchor;
use crate::cursor::TryPopError;
use crate::links::{next_of, Linked};
use crate::loom::sync::atomic::{AtomicPtr, Ordering};
use crate::tracked::{lock, Entry, Tracker};

// =============================================================================
// Bug 1: Hand-off slot overwritten on every push
// =============================================================================

/// Queue whose push always publishes through `head`.
///
/// BUG: the predecessor's link is never written. If the consumer has not
/// claimed the previous hand-off yet, that node is overwritten and becomes
/// unreachable.
///
/// CAUGHT BY: DST invariant check (NoLostElements)
pub struct OverwritingHandoffQueue {
    tail: AtomicPtr<Entry>,
    head: AtomicPtr<Entry>,
    cursor: Mutex<*mut Entry>,
    tracker: Mutex<Tracker>,
}

impl OverwritingHandoffQueue {
    pub fn new() -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
            head: AtomicPtr::new(ptr::null_mut()),
            cursor: Mutex::new(ptr::null_mut()),
            tracker: Mutex::new(Tracker::default()),
        }
    }

    /// BUG: `prior` is ignored.
    pub fn push(&self, producer: u64, value: u64) {
        let node = Entry::into_ptr(Entry::new(producer, value));
        let _prior = self.tail.swap(node.as_ptr(), Ordering::AcqRel);
        self.head.store(node.as_ptr(), Ordering::Release);
        lock(&self.tracker).record_push(producer, value);
    }

    pub fn pop(&self) -> Option<u64> {
        let result = self.pop_entry().map(|entry| entry.value);
        lock(&self.tracker).record_pop(result);
        result.ok()
    }

    fn pop_entry(&self) -> Result<Box<Entry>, TryPopError> {
        let mut cursor = lock(&self.cursor);
        if cursor.is_null() {
            if self.head.load(Ordering::Acquire).is_null() {
                return Err(TryPopError::Empty);
            }
            *cursor = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        }
        let current = NonNull::new(*cursor).ok_or(TryPopError::Empty)?;

        // Safety: the node is owned by the queue until the return below.
        let next = unsafe { next_of(current) }.load(Ordering::Acquire);
        if next.is_null()
            && self
                .tail
                .compare_exchange(
                    current.as_ptr(),
                    ptr::null_mut(),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_err()
        {
            return Err(TryPopError::Inconsistent);
        }
        *cursor = next;
        // Safety: came from `into_ptr` in `push` and is returned exactly once.
        Ok(unsafe { Entry::from_ptr(current) })
    }

    fn get_contents(&self) -> Vec<u64> {
        let cursor = lock(&self.cursor);
        let mut current = NonNull::new(*cursor)
            .or_else(|| NonNull::new(self.head.load(Ordering::Acquire)));
        let mut contents = Vec::new();
        while let Some(node) = current {
            // Safety: nodes on the chain stay allocated while the cursor
            // lock is held.
            unsafe {
                contents.push(node.as_ref().value);
                current = NonNull::new(next_of(node).load(Ordering::Acquire));
            }
        }
        contents
    }
}

impl Default for OverwritingHandoffQueue {
    fn default() -> Self {
        Self::new()
    }
}

// Overwritten nodes are unreachable and leak; everything reachable is freed.
impl Drop for OverwritingHandoffQueue {
    fn drop(&mut self) {
        while self.pop_entry().is_ok() {}
    }
}

unsafe impl Send for OverwritingHandoffQueue {}
unsafe impl Sync for OverwritingHandoffQueue {}

impl QueueProperties for OverwritingHandoffQueue {
    fn pushed_elements(&self) -> HashSet<u64> {
        lock(&self.tracker).pushed()
    }

    fn popped_elements(&self) -> Vec<u64> {
        lock(&self.tracker).popped()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.get_contents()
    }

    fn history(&self) -> QueueHistory {
        lock(&self.tracker).history()
    }
}

// =============================================================================
// Bug 2: Returning the node when the closing CAS fails
// =============================================================================

/// Cursor that hands out its node even when a producer is still linking it.
///
/// BUG: when `next` is null and the CAS on `tail` fails, the node is
/// returned anyway and the cursor is cleared. The in-flight producer then
/// writes its link into a node the caller owns, and its own node is left
/// reachable from nowhere: `head` is null and `tail` is non-null, so no
/// later push republishes it.
///
/// CAUGHT BY: DST race-window scenarios (StrandedNode, LinkAfterHandOff),
/// stateright (all delivered at quiescence)
pub struct ReturnOnCasFailureCursor<T: Linked> {
    head: *mut T,
}

unsafe impl<T: Linked> Send for ReturnOnCasFailureCursor<T> where T::Handle: Send {}

impl<T: Linked> ReturnOnCasFailureCursor<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// # Safety
    ///
    /// Same contract as [`Cursor::try_pop`](crate::Cursor::try_pop). In
    /// addition, a returned handle must outlive every reservation that was
    /// outstanding when it was popped, or the late link write is a
    /// use-after-free.
    pub unsafe fn try_pop(&mut self, anchor: &Anchor<T>) -> Result<T::Handle, TryPopError> {
        if self.head.is_null() {
            let claimed = anchor.claim_handoff().ok_or(TryPopError::Empty)?;
            self.head = claimed.as_ptr();
        }
        let current = NonNull::new(self.head).ok_or(TryPopError::Empty)?;

        let next = next_of(current).load(Ordering::Acquire);
        if next.is_null() {
            // BUG: the result of the CAS is ignored.
            let _ = anchor.close(current);
        }
        self.head = next;
        Ok(T::from_ptr(current))
    }

    /// True if the cursor still holds claimed nodes.
    #[must_use]
    pub fn is_holding(&self) -> bool {
        !self.head.is_null()
    }

    /// The node the next pop will return, if the cursor already holds it.
    #[must_use]
    pub fn local_head(&self) -> Option<NonNull<T>> {
        NonNull::new(self.head)
    }
}

impl<T: Linked> Default for ReturnOnCasFailureCursor<T> {
    fn default() -> Self {
        Self::new()
    }
}
