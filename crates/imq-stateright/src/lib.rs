//! # imq-stateright
//!
//! Exhaustive model checking of the intrusive MPSC hand-off protocol.
//!
//! [`QueueModel`] explores every interleaving of producers and the
//! consumer for a small number of nodes and checks the queue's safety
//! properties in each reachable state.
//!
//! ```ignore
//! let report = imq_stateright::verify(QueueModel::new(2, 2));
//! assert!(report.passed, "{}", report.format());
//! ```

pub mod queue_model;

use std::time::{Duration, Instant};

use stateright::{Checker, Expectation, Model};

pub use queue_model::{ConsumerPc, InFlight, NodeId, QueueAction, QueueModel, QueueState, NODES_MAX};

/// Outcome of checking a [`QueueModel`].
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub passed: bool,
    pub state_count: usize,
    /// `always` properties with a counterexample, and the path to it.
    pub violations: Vec<(&'static str, Vec<QueueAction>)>,
    /// `sometimes` properties no state satisfied.
    pub unreached: Vec<&'static str>,
    pub duration: Duration,
}

impl VerificationReport {
    #[must_use]
    pub fn violated(&self, name: &str) -> bool {
        self.violations.iter().any(|(n, _)| *n == name)
    }

    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut out = format!(
            "[{}] stateright: {} states explored in {:.2}s",
            status,
            self.state_count,
            self.duration.as_secs_f64()
        );
        for (name, path) in &self.violations {
            out.push_str(&format!("\n  Property \"{}\" violated: {:?}", name, path));
        }
        for name in &self.unreached {
            out.push_str(&format!("\n  Property \"{}\" never reached", name));
        }
        out
    }
}

/// Breadth-first check of every reachable state of `model`.
#[must_use]
pub fn verify(model: QueueModel) -> VerificationReport {
    let properties = model.properties();
    let start = Instant::now();
    let checker = model.checker().spawn_bfs().join();
    let duration = start.elapsed();

    let mut violations = Vec::new();
    let mut unreached = Vec::new();
    for property in &properties {
        let discovery = checker.discovery(property.name);
        match property.expectation {
            Expectation::Always | Expectation::Eventually => {
                if let Some(path) = discovery {
                    violations.push((property.name, path.into_actions()));
                }
            }
            Expectation::Sometimes => {
                if discovery.is_none() {
                    unreached.push(property.name);
                }
            }
        }
    }

    VerificationReport {
        passed: checker.is_done() && violations.is_empty() && unreached.is_empty(),
        state_count: checker.unique_state_count(),
        violations,
        unreached,
        duration,
    }
}
