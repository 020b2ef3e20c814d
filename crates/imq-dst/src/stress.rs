//! Real-thread stress harness.
//!
//! Unlike the simulator, the schedule here is whatever the OS produces, so
//! a failure is not reproducible from a seed. The checks run on what the
//! consumer observed, after every producer has joined.

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use imq::{queue, Entry, TryPopError};

use crate::runner::PRODUCERS_MAX;
use crate::ConfigError;

/// Parameters of a stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressConfig {
    pub producers: u64,
    pub pushes_per_producer: u64,
    /// Producers yield after every N pushes (0 = never), widening the
    /// window between a `tail` exchange and the matching link.
    pub yield_every: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            producers: 4,
            pushes_per_producer: 10_000,
            yield_every: 64,
        }
    }
}

impl StressConfig {
    #[must_use]
    pub fn quick() -> Self {
        Self {
            producers: 2,
            pushes_per_producer: 1_000,
            yield_every: 16,
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
        Ok(())
    }
}

/// What the consumer saw.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub passed: bool,
    pub received: u64,
    pub expected: u64,
    pub empty_pops: u64,
    pub inconsistent_pops: u64,
    pub elapsed: Duration,
    pub violations: Vec<String>,
}

impl StressReport {
    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut out = format!(
            "[{}] stress received={}/{} empty={} inconsistent={} elapsed={:?}",
            status,
            self.received,
            self.expected,
            self.empty_pops,
            self.inconsistent_pops,
            self.elapsed
        );
        for v in &self.violations {
            out.push_str("\n  VIOLATION: ");
            out.push_str(v);
        }
        out
    }
}

/// Run producers on real threads against one consumer on this thread.
pub fn run_stress(config: &StressConfig) -> Result<StressReport, ConfigError> {
    config.validate()?;
    let expected = config.producers * config.pushes_per_producer;
    info!(producers = config.producers, pushes = config.pushes_per_producer, "stress start");

    let (tx, mut rx) = queue::<Entry>();
    let start = Instant::now();

    let handles: Vec<_> = (0..config.producers)
        .map(|p| {
            let tx = tx.clone();
            let pushes = config.pushes_per_producer;
            let yield_every = config.yield_every;
            thread::spawn(move || {
                for seq in 0..pushes {
                    tx.push(Entry::new(p, seq));
                    if yield_every > 0 && seq % yield_every == 0 {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();
    drop(tx);

    // Next sequence number expected from each producer.
    let mut next_seq = vec![0u64; config.producers as usize];
    let mut violations = Vec::new();
    let mut received = 0u64;
    let mut empty_pops = 0u64;
    let mut inconsistent_pops = 0u64;

    let mut consume = |entry: Box<Entry>, violations: &mut Vec<String>| {
        received += 1;
        let Some(slot) = next_seq.get_mut(entry.producer as usize) else {
            violations.push(format!("Popped entry from unknown producer {}", entry.producer));
            return;
        };
        if entry.value != *slot {
            violations.push(format!(
                "Producer {}: expected seq {}, popped {}",
                entry.producer, *slot, entry.value
            ));
        }
        *slot = entry.value + 1;
    };

    while handles.iter().any(|h| !h.is_finished()) {
        match rx.try_pop() {
            Ok(entry) => consume(entry, &mut violations),
            Err(TryPopError::Empty) => {
                empty_pops += 1;
                thread::yield_now();
            }
            Err(TryPopError::Inconsistent) => {
                inconsistent_pops += 1;
                thread::yield_now();
            }
        }
    }

    for h in handles {
        if h.join().is_err() {
            violations.push("A producer thread panicked".to_string());
        }
    }

    // Every push has finished: the queue must drain completely.
    loop {
        match rx.try_pop() {
            Ok(entry) => consume(entry, &mut violations),
            Err(TryPopError::Empty) => break,
            Err(TryPopError::Inconsistent) => {
                let message = "Pop reported a producer mid-link after all producers joined";
                violations.push(message.to_string());
                break;
            }
        }
    }

    for (p, &seq) in next_seq.iter().enumerate() {
        if seq != config.pushes_per_producer {
            violations.push(format!(
                "Producer {}: {} of {} pushes delivered",
                p, seq, config.pushes_per_producer
            ));
        }
    }

    let report = StressReport {
        passed: violations.is_empty() && received == expected,
        received,
        expected,
        empty_pops,
        inconsistent_pops,
        elapsed: start.elapsed(),
        violations,
    };
    if report.passed {
        info!("{}", report.format());
    } else {
        warn!("{}", report.format());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_stress_passes() {
        let report = run_stress(&StressConfig::quick()).unwrap();
        assert!(report.passed, "{}", report.format());
        assert_eq!(report.received, 2_000);
    }

    #[test]
    fn test_single_producer_no_yield() {
        let config = StressConfig {
            producers: 1,
            pushes_per_producer: 5_000,
            yield_every: 0,
        };
        let report = run_stress(&config).unwrap();
        assert!(report.passed, "{}", report.format());
    }

    #[test]
    fn test_rejects_empty_config() {
        let config = StressConfig {
            pushes_per_producer: 0,
            ..StressConfig::quick()
        };
        assert_eq!(run_stress(&config).err(), Some(ConfigError::NoPushes));
    }
}
