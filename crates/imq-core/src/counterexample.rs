//! Failure traces: who did what, in which step, and what it broke.

use std::fmt::{self, Write as _};

/// The interleaving that led to a violation, plus what was observed
/// along the way.
#[derive(Debug, Clone, Default)]
pub struct Counterexample {
    pub states: Vec<StateSnapshot>,
    pub interleaving: Vec<ThreadAction>,
    pub hazards: Vec<HazardIssue>,
    /// Seed that replays the run, for simulated runs.
    pub dst_seed: Option<u64>,
    pub description: Option<String>,
}

/// Queue state after a step, e.g. `tail=N3 cursor=N1 pending=1`.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub step: u64,
    pub description: String,
    pub variables: Vec<(String, String)>,
}

/// One atomic step of a producer or the consumer.
#[derive(Debug, Clone)]
pub struct ThreadAction {
    /// Producers are numbered from 0; the consumer takes the next id.
    pub thread_id: u64,
    pub step: u64,
    /// e.g. `swap(tail) N4`, `N3.next=N4`, `pop() -> N3`
    pub action: String,
    /// False for a failed CAS or a pop that returned nothing.
    pub success: bool,
}

/// A node-ownership hazard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HazardIssue {
    /// A producer wrote a link into a node already handed to the consumer.
    LinkAfterHandOff { node: u64, producer: u64, step: u64 },
    /// A completed push the consumer can no longer reach.
    StrandedNode { node: u64, step: u64 },
    /// A node handed to the consumer more than once.
    DoubleHandOff { node: u64, first_step: u64, second_step: u64 },
}

impl Counterexample {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            dst_seed: Some(seed),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Record a snapshot. Several snapshots may share a step.
    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().map_or(true, |last| state.step >= last.step),
            "Snapshot for step {} recorded out of order",
            state.step
        );
        self.states.push(state);
    }

    pub fn add_action(&mut self, action: ThreadAction) {
        self.interleaving.push(action);
    }

    pub fn add_hazard(&mut self, issue: HazardIssue) {
        self.hazards.push(issue);
    }

    /// Render as one column per thread, one row per step that did
    /// something:
    ///
    /// ```text
    /// DST_SEED=3
    /// Failure: return-on-cas-failure cursor failed
    ///
    /// step | P0               | P1               | C
    /// -----+------------------+------------------+-----------------
    ///    1 | swap(tail) N0    |                  |
    ///    2 | store(head) N0   |                  |
    ///    3 |                  | swap(tail) N1    |
    ///    4 |                  |                  | pop() -> N0
    ///    5 |                  | N0.next=N1       |               <- tail=N1 cursor=- pending=0
    /// ```
    ///
    /// The highest thread id is labelled as the consumer.
    #[must_use]
    pub fn render_diagram(&self) -> String {
        let mut out = String::new();
        if let Some(seed) = self.dst_seed {
            let _ = writeln!(out, "DST_SEED={}", seed);
        }
        if let Some(desc) = &self.description {
            let _ = writeln!(out, "Failure: {}", desc);
        }
        out.push('\n');

        let mut threads: Vec<u64> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();
        let Some(&consumer) = threads.last() else {
            out.push_str("(no thread actions recorded)\n");
            self.render_hazards(&mut out);
            return out;
        };

        let cell = |a: &ThreadAction| {
            if a.success {
                a.action.clone()
            } else {
                format!("{} [FAIL]", a.action)
            }
        };
        let width = self
            .interleaving
            .iter()
            .map(|a| cell(a).len())
            .max()
            .unwrap_or(0)
            .max(8);
        let label = |tid: u64| {
            if tid == consumer && threads.len() > 1 {
                "C".to_string()
            } else {
                format!("P{}", tid)
            }
        };

        out.push_str("step");
        for &tid in &threads {
            let _ = write!(out, " | {:width$}", label(tid), width = width);
        }
        out.push('\n');
        out.push_str("-----");
        for _ in &threads {
            let _ = write!(out, "+{}", "-".repeat(width + 2));
        }
        out.push('\n');

        let mut steps: Vec<u64> = self.interleaving.iter().map(|a| a.step).collect();
        steps.sort_unstable();
        steps.dedup();
        for step in steps {
            let _ = write!(out, "{:4}", step);
            for &tid in &threads {
                let text = self
                    .interleaving
                    .iter()
                    .find(|a| a.step == step && a.thread_id == tid)
                    .map(cell)
                    .unwrap_or_default();
                let _ = write!(out, " | {:width$}", text, width = width);
            }
            for state in self.states.iter().filter(|s| s.step == step) {
                let _ = write!(out, " <- {}", state.description);
            }
            out.push('\n');
        }

        self.render_hazards(&mut out);
        out
    }

    fn render_hazards(&self, out: &mut String) {
        if self.hazards.is_empty() {
            return;
        }
        out.push_str("\nHazards:\n");
        for issue in &self.hazards {
            let _ = writeln!(out, "  - {}", issue);
        }
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_diagram())
    }
}

impl fmt::Display for HazardIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HazardIssue::LinkAfterHandOff { node, producer, step } => write!(
                f,
                "step {}: P{} linked into N{} after the consumer received it",
                step, producer, node
            ),
            HazardIssue::StrandedNode { node, step } => {
                write!(f, "step {}: N{} is unreachable by the consumer", step, node)
            }
            HazardIssue::DoubleHandOff {
                node,
                first_step,
                second_step,
            } => write!(
                f,
                "step {}: N{} handed out again (first at step {})",
                second_step, node, first_step
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(thread_id: u64, step: u64, action: &str, success: bool) -> ThreadAction {
        ThreadAction {
            thread_id,
            step,
            action: action.to_string(),
            success,
        }
    }

    #[test]
    fn test_render_race_window() {
        let mut ce = Counterexample::with_seed(42).with_description("N1 stranded");
        ce.add_action(action(0, 1, "swap(tail) N0", true));
        ce.add_action(action(0, 2, "store(head) N0", true));
        ce.add_action(action(1, 3, "swap(tail) N1", true));
        ce.add_action(action(2, 4, "pop() -> Inconsistent", false));
        ce.add_state(StateSnapshot {
            step: 4,
            description: "tail=N1 cursor=N0 pending=1".to_string(),
            variables: vec![],
        });
        ce.add_hazard(HazardIssue::StrandedNode { node: 1, step: 4 });

        let diagram = ce.render_diagram();
        assert!(diagram.starts_with("DST_SEED=42\nFailure: N1 stranded\n"));
        let header = diagram.lines().find(|l| l.starts_with("step")).unwrap();
        assert!(header.contains("P0") && header.contains("P1") && header.contains(" C"));
        assert!(diagram.contains("pop() -> Inconsistent [FAIL]"));
        assert!(diagram.contains("<- tail=N1 cursor=N0 pending=1"));
        assert!(diagram.contains("step 4: N1 is unreachable by the consumer"));
        // Only steps with an action get a row.
        assert_eq!(diagram.lines().filter(|l| l.starts_with("   ")).count(), 4);
    }

    #[test]
    fn test_snapshots_may_share_a_step() {
        let mut ce = Counterexample::new();
        for description in ["first", "second"] {
            ce.add_state(StateSnapshot {
                step: 7,
                description: description.to_string(),
                variables: vec![],
            });
        }
        ce.add_action(action(0, 7, "pop() -> Empty", false));
        let diagram = ce.to_string();
        assert!(diagram.contains("<- first <- second"));
        // A single thread is never labelled as the consumer.
        assert!(diagram.contains("P0"));
    }

    #[test]
    fn test_render_without_actions() {
        let mut ce = Counterexample::new();
        ce.add_hazard(HazardIssue::DoubleHandOff {
            node: 3,
            first_step: 2,
            second_step: 5,
        });
        let diagram = ce.render_diagram();
        assert!(diagram.contains("no thread actions recorded"));
        assert!(diagram.contains("step 5: N3 handed out again (first at step 2)"));
    }
}
