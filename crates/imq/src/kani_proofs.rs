//! Kani proof harnesses for the queue.
//!
//! Bounded model checking of sequential behaviour for every input up to a
//! bound.
//!
//! ```bash
//! cargo kani -p imq
//! cargo kani -p imq --harness proof_fifo_single_producer
//! ```
//!
//! Kani does not model concurrent execution. Interleavings are covered by
//! loom and the stateright model; the race window itself is proved here by
//! splitting a push into its two phases on one thread.

#[cfg(kani)]
mod proofs {
    use crate::anchor::Anchor;
    use crate::cursor::{Cursor, TryPopError};
    use crate::tracked::Entry;

    fn pop_value(cursor: &mut Cursor<Entry>, anchor: &Anchor<Entry>) -> Option<u64> {
        unsafe { cursor.pop(anchor) }.map(|e| e.value)
    }

    /// A pushed value comes back out.
    #[kani::proof]
    #[kani::unwind(3)]
    fn proof_pop_returns_pushed_value() {
        let anchor: Anchor<Entry> = Anchor::new();
        let mut cursor = Cursor::new();

        let value: u64 = kani::any();
        anchor.push(Entry::new(0, value));

        kani::assert(
            pop_value(&mut cursor, &anchor) == Some(value),
            "Pop must return the value that was just pushed",
        );
        kani::assert(anchor.is_idle(), "Queue must be idle after draining");
    }

    /// One producer's values leave in push order.
    #[kani::proof]
    #[kani::unwind(5)]
    fn proof_fifo_single_producer() {
        let anchor: Anchor<Entry> = Anchor::new();
        let mut cursor = Cursor::new();

        let v1: u64 = kani::any();
        let v2: u64 = kani::any();
        let v3: u64 = kani::any();
        anchor.push(Entry::new(0, v1));
        anchor.push(Entry::new(0, v2));
        anchor.push(Entry::new(0, v3));

        kani::assert(pop_value(&mut cursor, &anchor) == Some(v1), "first out is first in");
        kani::assert(pop_value(&mut cursor, &anchor) == Some(v2), "second out is second in");
        kani::assert(pop_value(&mut cursor, &anchor) == Some(v3), "third out is third in");
        kani::assert(pop_value(&mut cursor, &anchor).is_none(), "then empty");
    }

    /// Popping an empty queue has no effect, however often it is done.
    #[kani::proof]
    #[kani::unwind(6)]
    fn proof_empty_pop_is_idempotent() {
        let anchor: Anchor<Entry> = Anchor::new();
        let mut cursor = Cursor::new();

        let polls: u8 = kani::any();
        kani::assume(polls <= 4);
        for _ in 0..polls {
            let result = unsafe { cursor.try_pop(&anchor) };
            kani::assert(
                matches!(result, Err(TryPopError::Empty)),
                "Pop on empty queue must report Empty",
            );
        }
        kani::assert(anchor.is_idle(), "Empty pops must not change the anchor");
        kani::assert(!cursor.is_holding(), "Empty pops must not claim anything");
    }

    /// A pop in the race window withholds its node, and the next two pops
    /// after the link lands return both nodes in order.
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_race_window_withholds_node() {
        let anchor: Anchor<Entry> = Anchor::new();
        let mut cursor = Cursor::new();

        anchor.push(Entry::new(0, 1));
        let pending = anchor.reserve_slot(Entry::new(1, 2));

        let retries: u8 = kani::any();
        kani::assume(retries >= 1 && retries <= 2);
        for _ in 0..retries {
            let result = unsafe { cursor.try_pop(&anchor) };
            kani::assert(
                matches!(result, Err(TryPopError::Inconsistent)),
                "Pop must not hand out a node whose link is still owed",
            );
        }

        pending.commit();
        kani::assert(pop_value(&mut cursor, &anchor) == Some(1), "n1 first");
        kani::assert(pop_value(&mut cursor, &anchor) == Some(2), "then n2");
        kani::assert(pop_value(&mut cursor, &anchor).is_none(), "then empty");
    }

    /// Any sequence of pushes and pops never pops more than was pushed,
    /// and everything pushed is recovered by a final drain.
    #[kani::proof]
    #[kani::unwind(7)]
    fn proof_push_pop_sequence_conserves_nodes() {
        let anchor: Anchor<Entry> = Anchor::new();
        let mut cursor = Cursor::new();

        let mut pushed: u64 = 0;
        let mut popped: u64 = 0;

        for _ in 0..5u8 {
            if kani::any() {
                anchor.push(Entry::new(0, pushed));
                pushed += 1;
            } else if let Some(v) = pop_value(&mut cursor, &anchor) {
                kani::assert(v == popped, "Pop order must follow push order");
                popped += 1;
            }
        }
        kani::assert(popped <= pushed, "Cannot pop more than was pushed");

        while pop_value(&mut cursor, &anchor).is_some() {
            popped += 1;
        }
        kani::assert(popped == pushed, "Drain must recover every node");
    }
}

#[cfg(not(kani))]
mod proofs {}
