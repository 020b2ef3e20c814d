//! The intrusive link a payload embeds to become a queue node.

use core::fmt;
use core::marker::PhantomPinned;
use core::ptr::{self, NonNull};

use crate::loom::sync::atomic::{AtomicPtr, Ordering};

/// Trait implemented by types that can travel through an [`Anchor`].
///
/// # Safety
///
/// Implementations must ensure that:
///
/// - A node does not move in memory and is not deallocated while it is
///   inside a queue (between `into_ptr` and the matching `from_ptr`).
/// - `from_ptr` reverses `into_ptr` exactly, so ownership handed to the
///   queue is the ownership handed back.
/// - `links` returns the `Links` embedded in the node pointed to by `ptr`,
///   without creating an intermediate reference to the whole node.
///
/// [`Anchor`]: crate::Anchor
pub unsafe trait Linked: Sized {
    /// The owning handle moved into the queue by a push and out by a pop,
    /// typically `Box<Self>` or `Pin<Box<Self>>`.
    type Handle;

    /// Convert an owned handle into a raw pointer, giving up ownership.
    #[allow(clippy::wrong_self_convention)]
    fn into_ptr(handle: Self::Handle) -> NonNull<Self>;

    /// Convert a raw pointer back into an owned handle.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `into_ptr` and must not have been
    /// converted back already.
    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle;

    /// Return the links of the node pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live instance of `Self`.
    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Self>>;
}

/// The queue-owned "next" link of a node.
///
/// Its value is meaningful only while the node is inside a queue. Before a
/// push and after a pop it holds queue-private garbage.
pub struct Links<T> {
    pub(crate) next: AtomicPtr<T>,
    // Links are never `Unpin`: a node referenced from a queue must not
    // receive `noalias` treatment (rust-lang/rust#63818).
    _unpin: PhantomPinned,
}

impl<T> Links<T> {
    /// Returns an unlinked `Links`.
    #[cfg(not(loom))]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            _unpin: PhantomPinned,
        }
    }

    /// Returns an unlinked `Links`.
    #[cfg(loom)]
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            _unpin: PhantomPinned,
        }
    }
}

impl<T> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

/// The link cell of `node`.
///
/// # Safety
///
/// `node` must point to a live `T` for the whole of `'a`.
pub(crate) unsafe fn next_of<'a, T: Linked>(node: NonNull<T>) -> &'a AtomicPtr<T> {
    &(*T::links(node).as_ptr()).next
}
