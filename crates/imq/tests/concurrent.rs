//! Real-thread tests of the safe queue pair.

#![cfg(not(loom))]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use imq::{queue, Entry, TrackedQueue, TryPopError};
use imq_core::{PropertyChecker, QueuePropertyChecker};

const PRODUCERS: u64 = 4;
const PUSHES_PER_PRODUCER: u64 = 1000;

#[test]
fn test_many_producers_one_consumer() {
    let (tx, mut rx) = queue::<Entry>();
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..PUSHES_PER_PRODUCER {
                    tx.push(Entry::new(p, p * PUSHES_PER_PRODUCER + i));
                }
            })
        })
        .collect();
    drop(tx);

    let total = PRODUCERS * PUSHES_PER_PRODUCER;
    let mut seen = HashSet::new();
    let mut last: Vec<Option<u64>> = vec![None; PRODUCERS as usize];
    let mut inconsistent = 0u64;

    while (seen.len() as u64) < total {
        match rx.try_pop() {
            Ok(entry) => {
                assert!(seen.insert(entry.value), "Element {} popped twice", entry.value);
                let slot = &mut last[entry.producer as usize];
                if let Some(prev) = *slot {
                    assert!(
                        entry.value > prev,
                        "Producer {}: {} popped after {}",
                        entry.producer,
                        entry.value,
                        prev
                    );
                }
                *slot = Some(entry.value);
            }
            Err(TryPopError::Inconsistent) => {
                inconsistent += 1;
                thread::yield_now();
            }
            Err(TryPopError::Empty) => thread::yield_now(),
        }
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(rx.try_pop().err(), Some(TryPopError::Empty));
    assert!(rx.is_idle());
    println!("received {} elements, {} inconsistent pops", seen.len(), inconsistent);
}

#[test]
fn test_consumer_on_its_own_thread() {
    let (tx, mut rx) = queue::<Entry>();
    let done = Arc::new(AtomicBool::new(false));

    let consumer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut received = Vec::new();
            loop {
                let finished = done.load(Ordering::Acquire);
                received.extend(rx.drain().map(|e| e.value));
                // `done` was read before the final drain, so every push
                // finished before that drain started.
                if finished && rx.is_idle() {
                    return received;
                }
                thread::yield_now();
            }
        })
    };

    for i in 0..PUSHES_PER_PRODUCER {
        tx.push(Entry::new(0, i));
    }
    done.store(true, Ordering::Release);

    let received = consumer.join().unwrap();
    let expected: Vec<u64> = (0..PUSHES_PER_PRODUCER).collect();
    assert_eq!(received, expected);
}

#[test]
fn test_tracked_queue_invariants_after_join() {
    let queue = Arc::new(TrackedQueue::new());
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let q = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PUSHES_PER_PRODUCER / 4 {
                    q.push(p, p * PUSHES_PER_PRODUCER + i);
                }
            })
        })
        .collect();

    for _ in 0..PUSHES_PER_PRODUCER / 2 {
        queue.pop();
    }
    for h in handles {
        h.join().unwrap();
    }

    // Quiescent: the checker's view of the contents is exact now.
    let checker = QueuePropertyChecker::new(queue.as_ref());
    for result in checker.check_all() {
        assert!(result.holds, "{}", result.summary());
    }

    while queue.pop().is_some() {}
    assert!(queue.is_empty());
    assert!(checker.all_hold());
}
