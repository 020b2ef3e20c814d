//! # imq-core
//!
//! Core types and invariants for verifying the intrusive MPSC queue.
//!
//! This crate provides:
//! - `PropertyResult` and `PropertyChecker` for verifying invariants
//! - `Counterexample` for rendering failure paths
//! - `QueueProperties`, the view an implementation exposes to the checker
//!
//! The queue's tracked variants and the deterministic simulator both
//! report through `QueuePropertyChecker`.

pub mod counterexample;
pub mod invariants;
pub mod property;

pub use counterexample::{Counterexample, HazardIssue, StateSnapshot, ThreadAction};
pub use invariants::queue::{
    QueueHistory, QueueOpType, QueueOperation, QueueProperties, QueuePropertyChecker,
};
pub use property::{PropertyChecker, PropertyResult};
