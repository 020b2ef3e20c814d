//! MPSC queue invariants.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoLostElements | Every pushed element is in the queue or was popped |
//! | NoDuplicates | No element is popped twice or both popped and queued |
//! | NoFabrication | Only pushed elements are ever popped or queued |
//! | PerProducerOrder | One producer's elements leave in the order it pushed them |
//!
//! Cross-producer order is deliberately not checked: the queue only
//! promises the linearization order of its `tail` exchange, which a
//! history recorded outside the queue cannot observe.

use std::collections::{HashMap, HashSet};

use crate::counterexample::{Counterexample, HazardIssue, StateSnapshot};
use crate::property::{PropertyChecker, PropertyResult};

/// Properties that any MPSC queue implementation must expose.
///
/// Implementations provide access to their internal state for
/// property checking. `current_contents` is only meaningful while the
/// queue is quiescent (no push between its tail exchange and its link).
pub trait QueueProperties {
    /// Set of all elements whose push completed.
    fn pushed_elements(&self) -> HashSet<u64>;

    /// Elements returned by pop, in the order the consumer received them.
    fn popped_elements(&self) -> Vec<u64>;

    /// Current contents of the queue, consumer end first.
    fn current_contents(&self) -> Vec<u64>;

    /// Operation history.
    /// Returns owned data to avoid lifetime issues with internal mutexes.
    fn history(&self) -> QueueHistory;
}

/// History of queue operations.
#[derive(Debug, Clone, Default)]
pub struct QueueHistory {
    /// Operations in the order they were recorded
    pub operations: Vec<QueueOperation>,
}

/// A single recorded queue operation.
#[derive(Debug, Clone)]
pub struct QueueOperation {
    /// Producer id for pushes, consumer id for pops
    pub thread_id: u64,
    /// Type of operation
    pub op_type: QueueOpType,
    /// Element pushed or popped
    pub element: Option<u64>,
    /// Step number for ordering
    pub step: u64,
}

/// Type of queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOpType {
    Push,
    Pop,
    PopEmpty,
    /// Pop observed a producer between its tail exchange and its link.
    PopInconsistent,
}

impl QueueHistory {
    /// Create a new empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed push.
    pub fn record_push(&mut self, producer: u64, element: u64, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(QueueOperation {
            thread_id: producer,
            op_type: QueueOpType::Push,
            element: Some(element),
            step,
        });
    }

    /// Record a pop that returned `element`.
    pub fn record_pop(&mut self, consumer: u64, element: u64, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(QueueOperation {
            thread_id: consumer,
            op_type: QueueOpType::Pop,
            element: Some(element),
            step,
        });
    }

    /// Record a pop that returned nothing.
    pub fn record_pop_none(&mut self, consumer: u64, inconsistent: bool, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(QueueOperation {
            thread_id: consumer,
            op_type: if inconsistent {
                QueueOpType::PopInconsistent
            } else {
                QueueOpType::PopEmpty
            },
            element: None,
            step,
        });
    }

    /// Push order per producer.
    #[must_use]
    pub fn pushes_by_producer(&self) -> HashMap<u64, Vec<u64>> {
        let mut by_producer: HashMap<u64, Vec<u64>> = HashMap::new();
        for op in &self.operations {
            if let (QueueOpType::Push, Some(e)) = (op.op_type, op.element) {
                by_producer.entry(op.thread_id).or_default().push(e);
            }
        }
        by_producer
    }

    /// Number of pops that found nothing.
    #[must_use]
    pub fn empty_pops(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| {
                matches!(
                    op.op_type,
                    QueueOpType::PopEmpty | QueueOpType::PopInconsistent
                )
            })
            .count()
    }
}

/// Property checker for MPSC queue implementations.
pub struct QueuePropertyChecker<'a, T: QueueProperties> {
    queue: &'a T,
    dst_seed: Option<u64>,
}

impl<'a, T: QueueProperties> QueuePropertyChecker<'a, T> {
    /// Create a new checker for the given queue.
    #[must_use]
    pub fn new(queue: &'a T) -> Self {
        Self {
            queue,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.dst_seed = Some(seed);
        self
    }

    fn counterexample(&self) -> Counterexample {
        match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        }
    }

    /// Every element that was pushed must either be in the queue
    /// or have been popped.
    fn check_no_lost_elements(&self) -> PropertyResult {
        let pushed = self.queue.pushed_elements();
        let popped: HashSet<u64> = self.queue.popped_elements().into_iter().collect();
        let contents: HashSet<u64> = self.queue.current_contents().into_iter().collect();

        let mut lost: Vec<u64> = pushed
            .iter()
            .filter(|e| !popped.contains(e) && !contents.contains(e))
            .copied()
            .collect();
        lost.sort_unstable();

        if let Some(&element) = lost.first() {
            let mut ce = self.counterexample();
            ce.add_state(StateSnapshot {
                step: 1,
                description: format!("Element {} lost", element),
                variables: vec![
                    ("pushed".to_string(), format!("{:?}", pushed)),
                    ("popped".to_string(), format!("{:?}", popped)),
                    ("contents".to_string(), format!("{:?}", contents)),
                ],
            });
            for &node in &lost {
                ce.add_hazard(HazardIssue::StrandedNode { node, step: 1 });
            }

            return PropertyResult::fail(
                "NoLostElements",
                format!(
                    "Element {} was pushed but is neither queued nor popped ({} lost in total)",
                    element,
                    lost.len()
                ),
                Some(ce),
            );
        }

        PropertyResult::pass("NoLostElements")
    }

    /// No element is handed out twice, queued twice, or both.
    fn check_no_duplicates(&self) -> PropertyResult {
        let popped = self.queue.popped_elements();
        let mut seen = HashSet::new();
        for element in &popped {
            if !seen.insert(*element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!("Element {} was popped more than once", element),
                    None,
                );
            }
        }

        let mut queued = HashSet::new();
        for element in self.queue.current_contents() {
            if !queued.insert(element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!("Element {} appears multiple times in the queue", element),
                    None,
                );
            }
            if seen.contains(&element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!("Element {} was popped but is still queued", element),
                    None,
                );
            }
        }

        PropertyResult::pass("NoDuplicates")
    }

    /// Nothing leaves or sits in the queue that was never pushed.
    fn check_no_fabrication(&self) -> PropertyResult {
        let pushed = self.queue.pushed_elements();

        if let Some(element) = self
            .queue
            .popped_elements()
            .into_iter()
            .find(|e| !pushed.contains(e))
        {
            return PropertyResult::fail(
                "NoFabrication",
                format!("Element {} was popped but never pushed", element),
                None,
            );
        }

        if let Some(element) = self
            .queue
            .current_contents()
            .into_iter()
            .find(|e| !pushed.contains(e))
        {
            return PropertyResult::fail(
                "NoFabrication",
                format!("Element {} is queued but was never pushed", element),
                None,
            );
        }

        PropertyResult::pass("NoFabrication")
    }

    /// The elements of each producer leave the queue as a prefix of
    /// that producer's push order.
    fn check_per_producer_order(&self) -> PropertyResult {
        let history = self.queue.history();
        let by_producer = history.pushes_by_producer();

        let mut position: HashMap<u64, (u64, usize)> = HashMap::new();
        for (&producer, elements) in &by_producer {
            for (index, &e) in elements.iter().enumerate() {
                position.insert(e, (producer, index));
            }
        }

        let mut next_expected: HashMap<u64, usize> = HashMap::new();
        for element in self.queue.popped_elements() {
            let Some(&(producer, index)) = position.get(&element) else {
                continue;
            };
            let expected = next_expected.entry(producer).or_insert(0);
            if index != *expected {
                let wanted = by_producer[&producer][(*expected).min(index)];
                return PropertyResult::fail(
                    "PerProducerOrder",
                    format!(
                        "Producer {}: element {} (push #{}) popped while element {} \
                         (push #{}) was still pending",
                        producer,
                        element,
                        index,
                        wanted,
                        *expected
                    ),
                    None,
                );
            }
            *expected += 1;
        }

        PropertyResult::pass("PerProducerOrder")
    }
}

impl<T: QueueProperties> PropertyChecker for QueuePropertyChecker<'_, T> {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_no_lost_elements(),
            self.check_no_duplicates(),
            self.check_no_fabrication(),
            self.check_per_producer_order(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Sequential reference queue.
    struct TestQueue {
        pushed: HashSet<u64>,
        popped: Vec<u64>,
        contents: VecDeque<u64>,
        history: QueueHistory,
    }

    impl TestQueue {
        fn new() -> Self {
            Self {
                pushed: HashSet::new(),
                popped: Vec::new(),
                contents: VecDeque::new(),
                history: QueueHistory::new(),
            }
        }

        fn step(&self) -> u64 {
            self.history.operations.len() as u64 + 1
        }

        fn push(&mut self, producer: u64, val: u64) {
            self.pushed.insert(val);
            self.contents.push_back(val);
            let step = self.step();
            self.history.record_push(producer, val, step);
        }

        fn pop(&mut self) -> Option<u64> {
            let val = self.contents.pop_front();
            let step = self.step();
            match val {
                Some(v) => {
                    self.popped.push(v);
                    self.history.record_pop(99, v, step);
                }
                None => self.history.record_pop_none(99, false, step),
            }
            val
        }
    }

    impl QueueProperties for TestQueue {
        fn pushed_elements(&self) -> HashSet<u64> {
            self.pushed.clone()
        }

        fn popped_elements(&self) -> Vec<u64> {
            self.popped.clone()
        }

        fn current_contents(&self) -> Vec<u64> {
            self.contents.iter().copied().collect()
        }

        fn history(&self) -> QueueHistory {
            self.history.clone()
        }
    }

    fn find<'r>(results: &'r [PropertyResult], name: &str) -> &'r PropertyResult {
        results.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_correct_queue_passes_all() {
        let mut queue = TestQueue::new();
        queue.push(0, 1);
        queue.push(1, 10);
        queue.push(0, 2);
        queue.pop();
        queue.pop();
        queue.push(1, 11);

        let checker = QueuePropertyChecker::new(&queue);
        assert!(checker.all_hold());
        assert_eq!(queue.history.empty_pops(), 0);
    }

    #[test]
    fn test_lost_element_detected() {
        let mut queue = TestQueue::new();
        queue.push(0, 1);
        queue.push(0, 2);
        queue.push(0, 3);
        queue.pop();
        // Element 3 vanishes from the structure.
        queue.contents.pop_back();

        let checker = QueuePropertyChecker::new(&queue).with_seed(7);
        let results = checker.check_all();

        let no_lost = find(&results, "NoLostElements");
        assert!(!no_lost.holds);
        assert!(no_lost.violation.as_ref().unwrap().contains('3'));
        let ce = no_lost.counterexample.as_ref().unwrap();
        assert_eq!(ce.dst_seed, Some(7));
        assert_eq!(ce.hazards, vec![HazardIssue::StrandedNode { node: 3, step: 1 }]);
    }

    #[test]
    fn test_duplicate_pop_detected() {
        let mut queue = TestQueue::new();
        queue.push(0, 5);
        queue.pop();
        queue.popped.push(5);

        let checker = QueuePropertyChecker::new(&queue);
        let no_dup = checker.first_violation().unwrap();
        assert_eq!(no_dup.name, "NoDuplicates");
    }

    #[test]
    fn test_popped_and_queued_detected() {
        let mut queue = TestQueue::new();
        queue.push(0, 5);
        queue.push(0, 6);
        queue.pop();
        queue.contents.push_front(5);

        let results = QueuePropertyChecker::new(&queue).check_all();
        assert!(!find(&results, "NoDuplicates").holds);
    }

    #[test]
    fn test_fabrication_detected() {
        let mut queue = TestQueue::new();
        queue.push(0, 1);
        queue.popped.push(42);

        let results = QueuePropertyChecker::new(&queue).check_all();
        let fabricated = find(&results, "NoFabrication");
        assert!(!fabricated.holds);
        assert!(fabricated.violation.as_ref().unwrap().contains("42"));
    }

    #[test]
    fn test_per_producer_reorder_detected() {
        let mut queue = TestQueue::new();
        queue.push(0, 1);
        queue.push(0, 2);
        queue.push(1, 10);
        // The consumer receives producer 0's second element first.
        queue.contents = VecDeque::from(vec![2, 10, 1]);
        queue.pop();

        let results = QueuePropertyChecker::new(&queue).check_all();
        let order = find(&results, "PerProducerOrder");
        assert!(!order.holds);
        assert!(order.violation.as_ref().unwrap().contains("Producer 0"));
    }

    #[test]
    fn test_cross_producer_interleaving_allowed() {
        let mut queue = TestQueue::new();
        queue.push(0, 1);
        queue.push(1, 10);
        queue.contents = VecDeque::from(vec![10, 1]);
        queue.pop();
        queue.pop();

        assert!(QueuePropertyChecker::new(&queue).all_hold());
    }
}
