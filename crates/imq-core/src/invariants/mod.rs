//! Invariant traits for verified queues.
//!
//! - `queue`: MPSC hand-off queue invariants (NoLostElements, NoDuplicates,
//!   NoFabrication, PerProducerOrder)

pub mod queue;

pub use queue::{QueueHistory, QueueOperation, QueueOpType, QueueProperties, QueuePropertyChecker};
