//! # imq
//!
//! An intrusive, unbounded, lock-free multi-producer single-consumer queue.
//!
//! Nodes are allocated and owned by the caller. A payload becomes a node by
//! embedding a [`Links`] and implementing [`Linked`]; the queue moves the
//! owning [`Linked::Handle`] in on push and back out on pop, and never
//! allocates or frees anything itself.
//!
//! The shared state is an [`Anchor`] of two atomic pointers:
//!
//! - `tail`, the most recently pushed node, swapped by every producer;
//! - `head`, a hand-off slot written only by a push that finds the queue
//!   empty and cleared by the consumer when it claims the chain.
//!
//! The consumer walks the chain with a private [`Cursor`] and touches the
//! anchor only when its local chain runs dry.
//!
//! Use [`queue`] for a safe [`Producer`]/[`Consumer`] pair, or pair an
//! [`Anchor`] with a [`Cursor`] directly when the single-consumer contract
//! is upheld some other way.
//!
//! # Verification
//!
//! - `tracked`: history-recording queue checked by `imq-core`
//! - `faulty`: intentionally broken variants the checkers must catch
//! - `kani_proofs`: bounded proofs (under `#[cfg(kani)]`)
//! - loom tests for interleavings (under `#[cfg(loom)]`)

mod anchor;
mod channel;
mod cursor;
pub mod faulty;
pub mod kani_proofs;
mod links;
mod loom;
pub mod tracked;

pub use anchor::{Anchor, Reservation};
pub use channel::{queue, Consumer, Drain, Producer};
pub use cursor::{Cursor, TryPopError};
#[cfg(feature = "sim")]
pub use cursor::walk_chain;
pub use links::{Linked, Links};
pub use tracked::{Entry, TrackedQueue};
