//! Step-level simulation of producers and the consumer on one thread.
//!
//! Each simulated producer runs a push in two steps:
//!
//! ```text
//!   Reserve(p)   swap(tail)                 the node owns the tail slot
//!   Commit(p)    store(head) | store(prior.next)
//! ```
//!
//! Between the two, the queue sits in the race window. The scheduler may
//! run any number of pops and other producers' steps there, which is how
//! the simulator reaches interleavings that real threads hit rarely.
//!
//! Every node the consumer receives is kept alive until the run ends. A
//! correct cursor never hands out a node that still has a link owed to it;
//! a broken one does, and the late link write then lands in live memory
//! and is reported as a `LinkAfterHandOff` hazard.
//!
//! # Invariants
//!
//! | Check | When |
//! |-------|------|
//! | `QueuePropertyChecker` properties | every `invariant_check_interval` steps, and at the end |
//! | No link into a delivered node | every commit |
//! | No spurious empty | every pop while no producer holds a reservation |
//! | Eventual delivery | at the end, after every push has committed |

use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;

use serde::Serialize;
use tracing::{debug, info, warn};

use imq::faulty::ReturnOnCasFailureCursor;
use imq::{walk_chain, Anchor, Cursor, Entry, Reservation, TryPopError};
use imq_core::{
    Counterexample, HazardIssue, PropertyChecker, PropertyResult, QueueHistory, QueueProperties,
    QueuePropertyChecker, StateSnapshot, ThreadAction,
};

use crate::env::DstEnv;
use crate::fault::FaultConfig;
use crate::ConfigError;

/// Maximum number of simulated producers.
pub const PRODUCERS_MAX: u64 = 64;

/// Values are `producer * VALUE_STRIDE + sequence`, unique across producers.
const VALUE_STRIDE: u64 = 1 << 32;

/// Violations beyond this many are counted but not stored.
const VIOLATIONS_STORED_MAX: usize = 32;

/// A consumer cursor the simulator can drive.
pub trait SimCursor: Default {
    /// Name used in logs and results.
    const NAME: &'static str;

    /// # Safety
    ///
    /// The cursor must be paired with `anchor` for its whole life, and no
    /// other cursor may pop from it.
    unsafe fn try_pop(&mut self, anchor: &Anchor<Entry>) -> Result<Box<Entry>, TryPopError>;

    /// The node the cursor holds, if any.
    fn local_head(&self) -> Option<NonNull<Entry>>;
}

impl SimCursor for Cursor<Entry> {
    const NAME: &'static str = "cursor";

    unsafe fn try_pop(&mut self, anchor: &Anchor<Entry>) -> Result<Box<Entry>, TryPopError> {
        Cursor::try_pop(self, anchor)
    }

    fn local_head(&self) -> Option<NonNull<Entry>> {
        Cursor::local_head(self)
    }
}

impl SimCursor for ReturnOnCasFailureCursor<Entry> {
    const NAME: &'static str = "return-on-cas-failure";

    unsafe fn try_pop(&mut self, anchor: &Anchor<Entry>) -> Result<Box<Entry>, TryPopError> {
        ReturnOnCasFailureCursor::try_pop(self, anchor)
    }

    fn local_head(&self) -> Option<NonNull<Entry>> {
        ReturnOnCasFailureCursor::local_head(self)
    }
}

/// An anchor and the one cursor that will ever pop from it.
pub struct SimQueue<C: SimCursor = Cursor<Entry>> {
    anchor: Anchor<Entry>,
    cursor: C,
}

impl<C: SimCursor> SimQueue<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Anchor::new(),
            cursor: C::default(),
        }
    }

    /// Start a run with `producers` simulated producers.
    pub fn runner(&mut self, env: DstEnv, producers: u64) -> DstRunner<'_, C> {
        DstRunner::new(&self.anchor, &mut self.cursor, env, producers)
    }
}

impl<C: SimCursor> Default for SimQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: SimCursor> Drop for SimQueue<C> {
    fn drop(&mut self) {
        // Nodes a broken cursor stranded are unreachable and leak.
        // Safety: `self.cursor` is the only cursor ever paired with the anchor.
        while unsafe { self.cursor.try_pop(&self.anchor) }.is_ok() {}
    }
}

/// One step of a scripted scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstOp {
    /// Producer `p` swaps `tail` but does not link yet.
    Reserve(u64),
    /// Producer `p` links its reserved node.
    Commit(u64),
    /// Producer `p` runs a whole push.
    Push(u64),
    /// The consumer pops once.
    Pop,
    /// Run the property checker now.
    Check,
}

/// Counters from a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DstStats {
    pub seed: u64,
    pub steps: u64,
    pub reserves: u64,
    pub commits: u64,
    pub pops: u64,
    pub delivered: u64,
    pub empty_pops: u64,
    pub inconsistent_pops: u64,
    pub stalls: u64,
    pub pending_max: u64,
    pub invariant_checks: u64,
    pub elapsed_us: u64,
}

impl DstStats {
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "DST_SEED={} steps={} pushes={} delivered={} empty={} inconsistent={} stalls={} \
             pending_max={}",
            self.seed,
            self.steps,
            self.commits,
            self.delivered,
            self.empty_pops,
            self.inconsistent_pops,
            self.stalls,
            self.pending_max
        )
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct DstResult {
    pub cursor: &'static str,
    pub passed: bool,
    pub properties: Vec<PropertyResult>,
    pub violations: Vec<String>,
    pub violations_count: u64,
    pub stats: DstStats,
    #[serde(skip)]
    pub counterexample: Option<Counterexample>,
}

impl DstResult {
    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut out = format!("[{}] {} {}", status, self.cursor, self.stats.format());
        for p in self.properties.iter().filter(|p| !p.holds) {
            out.push_str("\n  ");
            out.push_str(&p.summary());
        }
        for v in &self.violations {
            out.push_str("\n  VIOLATION: ");
            out.push_str(v);
        }
        out
    }

    /// Ownership hazards recorded during the run (empty if it passed).
    #[must_use]
    pub fn hazards(&self) -> &[HazardIssue] {
        self.counterexample
            .as_ref()
            .map_or(&[][..], |ce| ce.hazards.as_slice())
    }

    /// True if some violation message or failed property name mentions
    /// `needle`. Hazards are not searched; see [`hazards`](Self::hazards).

    #[must_use]
    pub fn has_violation(&self, needle: &str) -> bool {
        self.violations.iter().any(|v| v.contains(needle))
            || self
                .properties
                .iter()
                .any(|p| !p.holds && p.name.contains(needle))
    }
}

struct Pending<'q> {
    reservation: Reservation<'q, Entry>,
    value: u64,
    /// Value of the node this push will link into, if any.
    prior: Option<u64>,
}

struct SimProducer<'q> {
    id: u64,
    issued: u64,
    pending: Option<Pending<'q>>,
}

/// Drives simulated producers and one consumer against a [`SimQueue`].
pub struct DstRunner<'q, C: SimCursor> {
    anchor: &'q Anchor<Entry>,
    cursor: &'q mut C,
    env: DstEnv,
    consumer_id: u64,
    // Declared before `delivered`: pending reservations commit on drop and
    // may write into a delivered node.
    producers: Vec<SimProducer<'q>>,
    delivered: Vec<Box<Entry>>,
    delivered_at: HashMap<u64, u64>,
    /// Value of the node the simulator believes owns `tail`.
    tail_owner: Option<u64>,
    pushed: HashSet<u64>,
    history: QueueHistory,
    trace: Counterexample,
    violations: Vec<String>,
    violations_count: u64,
    stats: DstStats,
}

impl<'q, C: SimCursor> DstRunner<'q, C> {
    fn new(anchor: &'q Anchor<Entry>, cursor: &'q mut C, env: DstEnv, producers: u64) -> Self {
        debug_assert!(producers > 0, "Must have at least one producer");
        debug_assert!(producers <= PRODUCERS_MAX, "Too many producers: {}", producers);

        let seed = env.seed();
        Self {
            anchor,
            cursor,
            env,
            consumer_id: producers,
            producers: (0..producers)
                .map(|id| SimProducer {
                    id,
                    issued: 0,
                    pending: None,
                })
                .collect(),
            delivered: Vec::new(),
            delivered_at: HashMap::new(),
            tail_owner: None,
            pushed: HashSet::new(),
            history: QueueHistory::new(),
            trace: Counterexample::with_seed(seed),
            violations: Vec::new(),
            violations_count: 0,
            stats: DstStats {
                seed,
                ..DstStats::default()
            },
        }
    }

    pub fn env(&mut self) -> &mut DstEnv {
        &mut self.env
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.env.seed()
    }

    #[must_use]
    pub fn producers(&self) -> u64 {
        self.producers.len() as u64
    }

    /// Pushes producer `p` has started, committed or not.
    #[must_use]
    pub fn issued(&self, p: u64) -> u64 {
        self.producers.get(p as usize).map_or(0, |s| s.issued)
    }

    #[must_use]
    pub fn has_pending(&self, p: u64) -> bool {
        self.producers
            .get(p as usize)
            .map_or(false, |s| s.pending.is_some())
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.producers.iter().filter(|s| s.pending.is_some()).count()
    }

    #[must_use]
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    fn next_step(&mut self) -> u64 {
        self.stats.steps += 1;
        self.stats.steps
    }

    fn act(&mut self, thread_id: u64, step: u64, action: String, success: bool) {
        self.trace.add_action(ThreadAction {
            thread_id,
            step,
            action,
            success,
        });
    }

    fn violate(&mut self, step: u64, message: String, hazard: Option<HazardIssue>) {
        warn!(step, "{}: {}", self.env.format_seed(), message);
        self.violations_count += 1;
        if let Some(h) = hazard {
            self.trace.add_hazard(h);
        }
        if self.violations.len() < VIOLATIONS_STORED_MAX {
            self.trace.add_state(StateSnapshot {
                step,
                description: self.describe_state(),
                variables: vec![
                    ("pushed".to_string(), self.pushed.len().to_string()),
                    ("delivered".to_string(), self.delivered.len().to_string()),
                    ("pending".to_string(), self.pending_count().to_string()),
                ],
            });
            self.violations.push(message);
        }
    }

    fn describe_state(&self) -> String {
        let tail = match self.tail_owner {
            Some(v) if !self.anchor.is_idle() => format!("N{}", v),
            _ => "-".to_string(),
        };
        let cursor = match self.cursor.local_head() {
            // Safety: the cursor only holds nodes the queue still owns.
            Some(node) => format!("N{}", unsafe { node.as_ref() }.value),
            None => "-".to_string(),
        };
        format!("tail={} cursor={} pending={}", tail, cursor, self.pending_count())
    }

    /// Producer `p` exchanges `tail` for a fresh node. Returns false if `p`
    /// does not exist or already holds a reservation.
    pub fn reserve(&mut self, p: u64) -> bool {
        let anchor: &'q Anchor<Entry> = self.anchor;
        let Some(producer) = self.producers.get_mut(p as usize) else {
            return false;
        };
        if producer.pending.is_some() {
            return false;
        }

        let value = producer.id * VALUE_STRIDE + producer.issued;
        producer.issued += 1;
        let reservation = anchor.reserve(Entry::new(p, value));
        let prior = if reservation.is_handoff() {
            None
        } else {
            self.tail_owner
        };
        producer.pending = Some(Pending {
            reservation,
            value,
            prior,
        });
        self.tail_owner = Some(value);

        self.stats.reserves += 1;
        self.stats.pending_max = self.stats.pending_max.max(self.pending_count() as u64);
        let step = self.next_step();
        debug!(step, producer = p, value, ?prior, "reserve");
        self.act(p, step, format!("swap(tail) N{}", value), true);
        true
    }

    /// Producer `p` links its reserved node. Returns false if it holds none.
    pub fn commit(&mut self, p: u64) -> bool {
        let Some(pending) = self
            .producers
            .get_mut(p as usize)
            .and_then(|s| s.pending.take())
        else {
            return false;
        };

        let step = self.next_step();
        if let Some(prior) = pending.prior {
            if self.delivered_at.contains_key(&prior) {
                self.violate(
                    step,
                    format!(
                        "Producer {} linked N{} into N{}, already handed to the consumer",
                        p, pending.value, prior
                    ),
                    Some(HazardIssue::LinkAfterHandOff {
                        node: prior,
                        producer: p,
                        step,
                    }),
                );
            }
        }

        pending.reservation.commit();
        self.pushed.insert(pending.value);
        self.history.record_push(p, pending.value, step);
        self.stats.commits += 1;

        let action = match pending.prior {
            Some(prior) => format!("N{}.next=N{}", prior, pending.value),
            None => format!("store(head) N{}", pending.value),
        };
        debug!(step, producer = p, value = pending.value, "commit");
        self.act(p, step, action, true);
        true
    }

    /// Producer `p` runs a whole push.
    pub fn push(&mut self, p: u64) -> bool {
        self.reserve(p) && self.commit(p)
    }

    /// The consumer pops once.
    pub fn pop(&mut self) -> Result<u64, TryPopError> {
        // Safety: the runner borrows the queue's only cursor together with
        // its anchor for its whole life.
        let result = unsafe { self.cursor.try_pop(self.anchor) };
        let step = self.next_step();
        self.stats.pops += 1;
        let consumer = self.consumer_id;

        match result {
            Ok(entry) => {
                let value = entry.value;
                if let Some(&first_step) = self.delivered_at.get(&value) {
                    self.violate(
                        step,
                        format!("N{} handed to the consumer twice", value),
                        Some(HazardIssue::DoubleHandOff {
                            node: value,
                            first_step,
                            second_step: step,
                        }),
                    );
                }
                self.delivered_at.insert(value, step);
                self.delivered.push(entry);
                self.history.record_pop(consumer, value, step);
                self.stats.delivered += 1;
                debug!(step, value, "pop");
                self.act(consumer, step, format!("pop() -> N{}", value), true);
                Ok(value)
            }
            Err(e) => {
                let inconsistent = e == TryPopError::Inconsistent;
                if inconsistent {
                    self.stats.inconsistent_pops += 1;
                } else {
                    self.stats.empty_pops += 1;
                }
                self.history.record_pop_none(consumer, inconsistent, step);
                debug!(step, error = %e, "pop");
                self.act(consumer, step, format!("pop() -> {:?}", e), false);

                if self.pending_count() == 0 {
                    let owed = self.pushed.len().saturating_sub(self.delivered.len());
                    if inconsistent {
                        self.violate(
                            step,
                            "Pop reported a producer mid-link while none was".to_string(),
                            None,
                        );
                    } else if owed > 0 {
                        self.violate(
                            step,
                            format!(
                                "Spurious empty: {} completed pushes not delivered \
                                 and no push in flight",
                                owed
                            ),
                            None,
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Run the property checker against the current state.
    ///
    /// Skipped (returns no results) while a reservation is pending: a node
    /// committed behind an unlinked one is not reachable yet, so the
    /// contents walk would under-report.
    pub fn check_invariants(&mut self) -> Vec<PropertyResult> {
        if self.pending_count() > 0 {
            debug!(pending = self.pending_count(), "invariant check deferred");
            return Vec::new();
        }
        self.stats.invariant_checks += 1;
        let results = QueuePropertyChecker::new(&*self)
            .with_seed(self.seed())
            .check_all();
        let step = self.stats.steps.max(1);
        for r in results.iter().filter(|r| !r.holds) {
            if let Some(ce) = &r.counterexample {
                for h in &ce.hazards {
                    self.trace.add_hazard(h.clone());
                }
            }
            self.violate(step, r.summary(), None);
        }
        results
    }

    /// Apply one scripted operation. Inapplicable operations are skipped.
    pub fn apply(&mut self, op: DstOp) {
        let applied = match op {
            DstOp::Reserve(p) => self.reserve(p),
            DstOp::Commit(p) => self.commit(p),
            DstOp::Push(p) => self.push(p),
            DstOp::Pop => {
                let _ = self.pop();
                true
            }
            DstOp::Check => {
                self.check_invariants();
                true
            }
        };
        if !applied {
            debug!(?op, "skipped");
        }
    }

    /// Commit every reservation, drain the queue and check everything.
    pub fn finish(mut self) -> DstResult {
        // Seeded order, so late links land in any permutation.
        let mut order: Vec<u64> = (0..self.producers()).collect();
        self.env.rng().shuffle(&mut order);
        for p in order {
            self.commit(p);
        }
        // Bounded: a correct cursor needs at most one pop per node plus one.
        let bound = self.pushed.len() + 1;
        for _ in 0..bound {
            if self.pop().is_err() {
                break;
            }
        }

        let mut properties = self.check_invariants();
        let owed = self.pushed.len().saturating_sub(self.delivered.len());
        properties.push(if owed == 0 {
            PropertyResult::pass("EventualDelivery")
        } else {
            PropertyResult::fail(
                "EventualDelivery",
                format!("{} completed pushes never delivered", owed),
                None,
            )
        });

        let env_stats = self.env.stats();
        self.stats.stalls = env_stats.faults.stalls;
        self.stats.elapsed_us = env_stats.elapsed_us;

        let passed = self.violations_count == 0 && properties.iter().all(|p| p.holds);
        let counterexample = if passed {
            None
        } else {
            let ce = self
                .trace
                .clone()
                .with_description(format!("{} cursor failed ({})", C::NAME, env_stats));
            Some(ce)
        };

        let result = DstResult {
            cursor: C::NAME,
            passed,
            properties,
            violations: self.violations.clone(),
            violations_count: self.violations_count,
            stats: self.stats.clone(),
            counterexample,
        };
        if passed {
            info!("{}", result.format());
        } else {
            warn!("{}", result.format());
        }
        result
    }
}

impl<C: SimCursor> QueueProperties for DstRunner<'_, C> {
    fn pushed_elements(&self) -> HashSet<u64> {
        self.pushed.clone()
    }

    fn popped_elements(&self) -> Vec<u64> {
        self.delivered.iter().map(|e| e.value).collect()
    }

    fn current_contents(&self) -> Vec<u64> {
        let mut contents = Vec::new();
        // Safety: single-threaded, so no link is written during the walk,
        // and every node on the chain is still owned by the queue.
        unsafe {
            walk_chain(self.cursor.local_head(), self.anchor, |node| {
                contents.push(node.as_ref().value)
            })
        };
        contents
    }

    fn history(&self) -> QueueHistory {
        self.history.clone()
    }
}

/// Parameters of a random simulation.
#[derive(Debug, Clone, Serialize)]
pub struct SimConfig {
    pub producers: u64,
    pub pushes_per_producer: u64,
    /// Chance that the next step is a pop rather than a producer step.
    pub pop_probability: f64,
    pub fault_config: FaultConfig,
    /// Check invariants after every N steps (0 = only at the end).
    pub invariant_check_interval: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            producers: 4,
            pushes_per_producer: 100,
            pop_probability: 0.4,
            fault_config: FaultConfig::default(),
            invariant_check_interval: 25,
        }
    }
}

impl SimConfig {
    #[must_use]
    pub fn quick() -> Self {
        Self {
            producers: 2,
            pushes_per_producer: 20,
            pop_probability: 0.5,
            fault_config: FaultConfig::default(),
            invariant_check_interval: 5,
        }
    }

    #[must_use]
    pub fn stress() -> Self {
        Self {
            producers: 8,
            pushes_per_producer: 1_000,
            pop_probability: 0.3,
            fault_config: FaultConfig::aggressive(),
            invariant_check_interval: 200,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.producers == 0 {
            return Err(ConfigError::NoProducers);
        }
        if self.producers > PRODUCERS_MAX {
            return Err(ConfigError::TooManyProducers(self.producers));
        }
        if self.pushes_per_producer == 0 {
            return Err(ConfigError::NoPushes);
        }
        if !(0.0..=1.0).contains(&self.pop_probability) {
            return Err(ConfigError::Probability {
                name: "pop_probability",
                value: self.pop_probability,
            });
        }
        self.fault_config.validate()
    }

    fn steps_max(&self) -> u64 {
        self.producers * self.pushes_per_producer * 50 + 1_000
    }
}

/// Run a scripted scenario with faults disabled.
///
/// The number of producers is one more than the largest producer id the
/// script mentions.
pub fn run_dst_scenario<C: SimCursor>(seed: u64, ops: &[DstOp]) -> DstResult {
    let producers = ops
        .iter()
        .filter_map(|op| match *op {
            DstOp::Reserve(p) | DstOp::Commit(p) | DstOp::Push(p) => Some(p + 1),
            DstOp::Pop | DstOp::Check => None,
        })
        .max()
        .unwrap_or(1)
        .min(PRODUCERS_MAX);

    let mut queue = SimQueue::<C>::new();
    let mut runner = queue.runner(DstEnv::with_fault_config(seed, FaultConfig::none()), producers);
    for &op in ops {
        runner.apply(op);
    }
    runner.finish()
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Reserve(u64),
    Commit(u64),
}

/// Run a randomly scheduled simulation.
pub fn run_simulation<C: SimCursor>(
    seed: u64,
    config: &SimConfig,
) -> Result<DstResult, ConfigError> {
    config.validate()?;
    info!(
        seed,
        cursor = C::NAME,
        producers = config.producers,
        pushes = config.pushes_per_producer,
        "simulation start"
    );

    let mut queue = SimQueue::<C>::new();
    let env = DstEnv::with_fault_config(seed, config.fault_config.clone());
    let mut runner = queue.runner(env, config.producers);
    let steps_max = config.steps_max();
    debug!(faults = ?runner.env().fault().config(), "fault injection");

    let mut ready = Vec::with_capacity(config.producers as usize);
    loop {
        ready.clear();
        let mut work_left = false;
        for p in 0..config.producers {
            if runner.has_pending(p) {
                work_left = true;
                if !runner.env().fault().should_stall() {
                    ready.push(Step::Commit(p));
                }
            } else if runner.issued(p) < config.pushes_per_producer {
                work_left = true;
                ready.push(Step::Reserve(p));
            }
        }
        if !work_left || runner.stats.steps >= steps_max {
            break;
        }

        let pop = ready.is_empty() || runner.env().rng().gen_bool(config.pop_probability);
        if pop {
            let _ = runner.pop();
        } else if let Some(&step) = runner.env().rng().choose(&ready) {
            match step {
                Step::Reserve(p) => runner.reserve(p),
                Step::Commit(p) => runner.commit(p),
            };
        }

        if config.invariant_check_interval > 0
            && runner.stats.steps % config.invariant_check_interval == 0
        {
            runner.check_invariants();
        }
        runner.env().maybe_delay();
    }

    Ok(runner.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use DstOp::{Check, Commit, Pop, Push, Reserve};

    type Faulty = ReturnOnCasFailureCursor<Entry>;

    #[test]
    fn test_scripted_fifo() {
        let ops = [Push(0), Push(0), Push(0), Pop, Pop, Pop, Pop];
        let result = run_dst_scenario::<Cursor<Entry>>(1, &ops);
        assert!(result.passed, "{}", result.format());
        assert_eq!(result.stats.delivered, 3);
        assert_eq!(result.stats.empty_pops, 2);
    }

    #[test]
    fn test_race_window_correct_cursor() {
        let ops = [Push(0), Reserve(1), Pop, Pop, Check, Commit(1), Pop, Pop, Pop];
        let result = run_dst_scenario::<Cursor<Entry>>(2, &ops);
        assert!(result.passed, "{}", result.format());
        assert_eq!(result.stats.inconsistent_pops, 2);
        assert_eq!(result.stats.delivered, 2);
    }

    #[test]
    fn test_race_window_faulty_cursor() {
        let ops = [Push(0), Reserve(1), Pop, Commit(1), Pop, Pop];
        let result = run_dst_scenario::<Faulty>(3, &ops);
        assert!(!result.passed);
        assert!(result.has_violation("already handed to the consumer"));
        assert!(result.has_violation("Spurious empty"));
        assert!(result.has_violation("EventualDelivery"));
        assert!(result.has_violation("NoLostElements"));

        let ce = result.counterexample.as_ref().unwrap();
        assert!(ce
            .hazards
            .iter()
            .any(|h| matches!(h, HazardIssue::LinkAfterHandOff { producer: 1, .. })));
        assert!(ce
            .hazards
            .iter()
            .any(|h| matches!(h, HazardIssue::StrandedNode { .. })));
        assert!(ce.render_diagram().contains("DST_SEED=3"));
        assert_eq!(result.hazards().len(), ce.hazards.len());
        let description = ce.description.as_deref().unwrap();
        assert!(description.starts_with("return-on-cas-failure cursor failed (DST_SEED=3 "));
    }

    #[test]
    fn test_finish_commits_every_pending_reservation() {
        let ops = [Reserve(0), Reserve(1), Reserve(2), Reserve(3)];
        for seed in 0..8 {
            let result = run_dst_scenario::<Cursor<Entry>>(seed, &ops);
            assert!(result.passed, "{}", result.format());
            assert_eq!(result.stats.commits, 4);
            assert_eq!(result.stats.delivered, 4);
        }
    }

    #[test]
    fn test_pending_handoff_is_not_spurious() {
        // The first push is mid-flight; an empty pop is allowed.
        let ops = [Reserve(0), Push(1), Pop, Check, Commit(0), Pop, Pop];
        let result = run_dst_scenario::<Cursor<Entry>>(4, &ops);
        assert!(result.passed, "{}", result.format());
        // One in the script, one from the final drain.
        assert_eq!(result.stats.empty_pops, 2);
        assert_eq!(result.stats.invariant_checks, 1);
    }

    #[test]
    fn test_inapplicable_ops_are_skipped() {
        let ops = [Commit(0), Reserve(0), Reserve(0), Commit(0), Commit(0), Pop];
        let result = run_dst_scenario::<Cursor<Entry>>(5, &ops);
        assert!(result.passed, "{}", result.format());
        assert_eq!(result.stats.reserves, 1);
        assert_eq!(result.stats.commits, 1);
    }

    #[test]
    fn test_random_simulation_passes() {
        let seed = crate::get_or_generate_seed();
        let result = run_simulation::<Cursor<Entry>>(seed, &SimConfig::quick()).unwrap();
        assert!(result.passed, "{}", result.format());
        assert_eq!(result.stats.delivered, 40);
    }

    #[test]
    fn test_random_simulation_is_deterministic() {
        let a = run_simulation::<Cursor<Entry>>(99, &SimConfig::quick()).unwrap();
        let b = run_simulation::<Cursor<Entry>>(99, &SimConfig::quick()).unwrap();
        assert_eq!(a.stats.steps, b.stats.steps);
        assert_eq!(a.stats.inconsistent_pops, b.stats.inconsistent_pops);
        assert_eq!(a.stats.stalls, b.stats.stalls);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SimConfig {
            producers: 0,
            ..SimConfig::quick()
        };
        assert_eq!(
            run_simulation::<Cursor<Entry>>(1, &config).err(),
            Some(ConfigError::NoProducers)
        );
        let config = SimConfig {
            pop_probability: -0.1,
            ..SimConfig::quick()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Probability { .. })));
    }
}
