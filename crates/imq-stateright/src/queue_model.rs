//! State machine of the hand-off protocol.
//!
//! Every atomic access of the queue is one transition:
//!
//! - `Exchange(p)`: producer `p` swaps `tail` for its next node
//! - `Link(p)`: producer `p` publishes that node, through `head` if the
//!   exchange returned null, otherwise through the prior node's link
//! - `Claim`: the consumer takes the chain out of `head`
//! - `ReadNext`: the consumer loads its current node's link and either
//!   advances (delivering the node) or goes on to close the queue
//! - `Close`: the consumer CASes `tail` from its node to null
//!
//! An empty pop does not change the state and is not modeled.
//!
//! # Invariants
//!
//! 1. `NoDuplicates`: no node is delivered twice
//! 2. `NoFabrication`: only exchanged nodes are delivered
//! 3. `PerProducerOrder`: each producer's nodes arrive in push order
//! 4. `NoLinkIntoDelivered`: no link is written into a delivered node
//! 5. `AllDeliveredAtQuiescence`: once producers are done and the consumer
//!    has nothing left to claim, every node has been delivered

use stateright::{Model, Property};

/// Node identifier: producer `p`'s `k`-th node is `p * pushes + k`.
pub type NodeId = u8;

/// Upper bound on nodes in a model (keeps ids in a `u8`).
pub const NODES_MAX: usize = 16;

/// A producer between its exchange and its link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InFlight {
    pub node: NodeId,
    /// What the exchange returned.
    pub prior: Option<NodeId>,
}

/// Where the consumer is inside a pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerPc {
    Idle,
    /// Saw a null link on `node`; the CAS on `tail` is next.
    Closing(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueState {
    pub tail: Option<NodeId>,
    pub head: Option<NodeId>,
    /// Link of each node, indexed by id.
    pub next: Vec<Option<NodeId>>,
    /// Pushes started, per producer.
    pub issued: Vec<u8>,
    pub in_flight: Vec<Option<InFlight>>,
    /// Consumer's local head.
    pub cursor: Option<NodeId>,
    pub consumer: ConsumerPc,
    /// Nodes in delivery order.
    pub delivered: Vec<NodeId>,
    /// A closing CAS has failed at least once.
    pub close_failed: bool,
    /// A producer linked into a node the consumer already had.
    pub linked_into_delivered: bool,
}

impl QueueState {
    fn producers_done(&self, pushes: u8) -> bool {
        self.in_flight.iter().all(Option::is_none) && self.issued.iter().all(|&i| i == pushes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAction {
    Exchange(u8),
    Link(u8),
    Claim,
    ReadNext,
    Close,
}

/// Model of `producers` producers each pushing `pushes_per_producer` nodes
/// against one consumer.
#[derive(Debug, Clone)]
pub struct QueueModel {
    pub producers: u8,
    pub pushes_per_producer: u8,
    /// Hand the node out when the closing CAS fails instead of keeping it.
    pub pop_on_cas_failure: bool,
}

impl QueueModel {
    #[must_use]
    pub fn new(producers: u8, pushes_per_producer: u8) -> Self {
        assert!(producers > 0 && pushes_per_producer > 0, "Empty model");
        assert!(
            usize::from(producers) * usize::from(pushes_per_producer) <= NODES_MAX,
            "Too many nodes"
        );
        Self {
            producers,
            pushes_per_producer,
            pop_on_cas_failure: false,
        }
    }

    /// The variant that returns its node when the closing CAS fails.
    #[must_use]
    pub fn pop_on_cas_failure(mut self) -> Self {
        self.pop_on_cas_failure = true;
        self
    }

    #[must_use]
    pub fn nodes(&self) -> usize {
        usize::from(self.producers) * usize::from(self.pushes_per_producer)
    }

    fn producer_of(&self, node: NodeId) -> u8 {
        node / self.pushes_per_producer
    }

    fn deliver(state: &mut QueueState, node: NodeId) {
        state.delivered.push(node);
    }
}

impl Model for QueueModel {
    type State = QueueState;
    type Action = QueueAction;

    fn init_states(&self) -> Vec<Self::State> {
        let producers = usize::from(self.producers);
        vec![QueueState {
            tail: None,
            head: None,
            next: vec![None; self.nodes()],
            issued: vec![0; producers],
            in_flight: vec![None; producers],
            cursor: None,
            consumer: ConsumerPc::Idle,
            delivered: Vec::new(),
            close_failed: false,
            linked_into_delivered: false,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for p in 0..self.producers {
            let i = usize::from(p);
            if state.in_flight[i].is_some() {
                actions.push(QueueAction::Link(p));
            } else if state.issued[i] < self.pushes_per_producer {
                actions.push(QueueAction::Exchange(p));
            }
        }
        match state.consumer {
            ConsumerPc::Closing(_) => actions.push(QueueAction::Close),
            ConsumerPc::Idle => match state.cursor {
                Some(_) => actions.push(QueueAction::ReadNext),
                None if state.head.is_some() => actions.push(QueueAction::Claim),
                None => {}
            },
        }
    }

    fn next_state(&self, last: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut state = last.clone();
        match action {
            QueueAction::Exchange(p) => {
                let i = usize::from(p);
                let node = p * self.pushes_per_producer + state.issued[i];
                state.next[usize::from(node)] = None;
                let prior = state.tail.replace(node);
                state.in_flight[i] = Some(InFlight { node, prior });
                state.issued[i] += 1;
            }
            QueueAction::Link(p) => {
                let flight = state.in_flight[usize::from(p)].take()?;
                match flight.prior {
                    None => state.head = Some(flight.node),
                    Some(prior) => {
                        if state.delivered.contains(&prior) {
                            state.linked_into_delivered = true;
                        }
                        state.next[usize::from(prior)] = Some(flight.node);
                    }
                }
            }
            QueueAction::Claim => {
                state.cursor = Some(state.head.take()?);
            }
            QueueAction::ReadNext => {
                let node = state.cursor?;
                match state.next[usize::from(node)] {
                    Some(next) => {
                        Self::deliver(&mut state, node);
                        state.cursor = Some(next);
                    }
                    None => state.consumer = ConsumerPc::Closing(node),
                }
            }
            QueueAction::Close => {
                let ConsumerPc::Closing(node) = state.consumer else {
                    return None;
                };
                state.consumer = ConsumerPc::Idle;
                if state.tail == Some(node) {
                    state.tail = None;
                    state.cursor = None;
                    Self::deliver(&mut state, node);
                } else {
                    state.close_failed = true;
                    if self.pop_on_cas_failure {
                        state.cursor = None;
                        Self::deliver(&mut state, node);
                    }
                }
            }
        }
        Some(state)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("NoDuplicates", |_: &QueueModel, state: &QueueState| {
                let mut seen = [false; NODES_MAX];
                state
                    .delivered
                    .iter()
                    .all(|&n| !std::mem::replace(&mut seen[usize::from(n)], true))
            }),
            Property::always("NoFabrication", |model: &QueueModel, state: &QueueState| {
                state.delivered.iter().all(|&n| {
                    let p = usize::from(model.producer_of(n));
                    p < usize::from(model.producers)
                        && n % model.pushes_per_producer < state.issued[p]
                })
            }),
            Property::always("PerProducerOrder", |model: &QueueModel, state: &QueueState| {
                let mut last: Vec<Option<NodeId>> = vec![None; usize::from(model.producers)];
                state.delivered.iter().all(|&n| {
                    let slot = &mut last[usize::from(model.producer_of(n))];
                    let in_order = slot.map_or(true, |prev| n > prev);
                    *slot = Some(n);
                    in_order
                })
            }),
            Property::always("NoLinkIntoDelivered", |_: &QueueModel, state: &QueueState| {
                !state.linked_into_delivered
            }),
            Property::always(
                "AllDeliveredAtQuiescence",
                |model: &QueueModel, state: &QueueState| {
                    let quiescent = state.producers_done(model.pushes_per_producer)
                        && state.consumer == ConsumerPc::Idle
                        && state.cursor.is_none()
                        && state.head.is_none();
                    !quiescent || state.delivered.len() == model.nodes()
                },
            ),
            Property::sometimes("RaceWindowReached", |_: &QueueModel, state: &QueueState| {
                state.close_failed
            }),
            Property::sometimes("EverythingDelivered", |model: &QueueModel, state: &QueueState| {
                state.delivered.len() == model.nodes()
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(model: &QueueModel, state: &QueueState, action: QueueAction) -> QueueState {
        let mut enabled = Vec::new();
        model.actions(state, &mut enabled);
        assert!(enabled.contains(&action), "{:?} not enabled in {:?}", action, state);
        model.next_state(state, action).unwrap()
    }

    fn race_window(model: &QueueModel) -> QueueState {
        use QueueAction::*;
        let mut s = model.init_states().remove(0);
        for a in [Exchange(0), Link(0), Exchange(1), Claim, ReadNext, Close] {
            s = step(model, &s, a);
        }
        s
    }

    #[test]
    fn test_close_failure_keeps_node() {
        let model = QueueModel::new(2, 1);
        let s = race_window(&model);
        assert!(s.close_failed);
        assert_eq!(s.cursor, Some(0));
        assert!(s.delivered.is_empty());

        let s = step(&model, &s, QueueAction::Link(1));
        assert!(!s.linked_into_delivered);
        let s = step(&model, &s, QueueAction::ReadNext);
        let s = step(&model, &s, QueueAction::ReadNext);
        let s = step(&model, &s, QueueAction::Close);
        assert_eq!(s.delivered, vec![0, 1]);
        assert_eq!(s.tail, None);
    }

    #[test]
    fn test_close_failure_hand_out_strands_successor() {
        let model = QueueModel::new(2, 1).pop_on_cas_failure();
        let s = race_window(&model);
        assert_eq!(s.delivered, vec![0]);
        assert_eq!(s.cursor, None);

        let s = step(&model, &s, QueueAction::Link(1));
        assert!(s.linked_into_delivered);

        // Nothing left for the consumer to do, yet node 1 was never delivered.
        let mut enabled = Vec::new();
        model.actions(&s, &mut enabled);
        assert!(enabled.is_empty());
        assert_eq!(s.tail, Some(1));
    }

    fn holds(model: &QueueModel, state: &QueueState, name: &str) -> bool {
        let property = model
            .properties()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap();
        (property.condition)(model, state)
    }

    #[test]
    fn test_property_conditions_on_stranded_state() {
        let model = QueueModel::new(2, 1).pop_on_cas_failure();
        let s = step(&model, &race_window(&model), QueueAction::Link(1));

        assert!(holds(&model, &s, "NoDuplicates"));
        assert!(holds(&model, &s, "NoFabrication"));
        assert!(holds(&model, &s, "PerProducerOrder"));
        assert!(holds(&model, &s, "RaceWindowReached"));
        assert!(!holds(&model, &s, "NoLinkIntoDelivered"));
        assert!(!holds(&model, &s, "AllDeliveredAtQuiescence"));
        assert!(!holds(&model, &s, "EverythingDelivered"));
    }

    #[test]
    fn test_property_conditions_reject_bad_delivery() {
        let model = QueueModel::new(2, 2);
        let mut s = model.init_states().remove(0);
        s.issued = vec![2, 2];
        // Producer 0's second node ahead of its first, and node 3 twice.
        s.delivered = vec![1, 0, 3, 3];
        assert!(!holds(&model, &s, "PerProducerOrder"));
        assert!(!holds(&model, &s, "NoDuplicates"));
        assert!(holds(&model, &s, "NoFabrication"));

        // Node 3 is producer 1's second push, which it never started.
        s.issued = vec![2, 1];
        assert!(!holds(&model, &s, "NoFabrication"));
    }
}
