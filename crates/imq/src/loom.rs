//! Atomics and `Arc`, swapped for loom's models under `--cfg loom`.
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test -p imq --release
//! ```

#[cfg(loom)]
pub(crate) mod sync {
    pub(crate) use loom::sync::atomic;
    pub(crate) use loom::sync::Arc;
}

#[cfg(not(loom))]
pub(crate) mod sync {
    pub(crate) use std::sync::atomic;
    pub(crate) use std::sync::Arc;
}
