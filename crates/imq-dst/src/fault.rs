//! Fault injection at operation boundaries.
//!
//! The queue has no failure paths of its own: a push always succeeds and a
//! pop only ever reports "nothing yet". The faults that matter are
//! scheduling faults:
//!
//! | Fault | What it simulates |
//! |-------|-------------------|
//! | Stall | A producer is preempted between its `tail` exchange and its link |
//! | Delay | A slow thread; advances the simulated clock |

use serde::Serialize;

use crate::random::DeterministicRng;
use crate::ConfigError;

/// Probabilities for each fault kind.
#[derive(Debug, Clone, Serialize)]
pub struct FaultConfig {
    /// Chance that a producer holding a reservation is skipped when it
    /// would otherwise be scheduled to commit.
    pub stall_probability: f64,
    /// Chance that a step is followed by a simulated delay.
    pub delay_probability: f64,
    /// Upper bound for a single simulated delay.
    pub delay_us_max: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            stall_probability: 0.3,
            delay_probability: 0.05,
            delay_us_max: 100,
        }
    }
}

impl FaultConfig {
    /// No faults at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            stall_probability: 0.0,
            delay_probability: 0.0,
            delay_us_max: 0,
        }
    }

    /// Producers stall most of the time, keeping the race window open.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            stall_probability: 0.8,
            delay_probability: 0.2,
            delay_us_max: 1_000,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, p) in [
            ("stall_probability", self.stall_probability),
            ("delay_probability", self.delay_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Probability { name, value: p });
            }
        }
        Ok(())
    }
}

/// Counts of injected faults.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FaultStats {
    pub checks: u64,
    pub stalls: u64,
    pub delays: u64,
}

/// Decides, deterministically, when to inject a fault.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    stats: FaultStats,
}

impl FaultInjector {
    #[must_use]
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        Self {
            rng,
            config,
            stats: FaultStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Should the producer about to commit be held back this step?
    pub fn should_stall(&mut self) -> bool {
        self.stats.checks += 1;
        let stall = self.rng.gen_bool(self.config.stall_probability);
        if stall {
            self.stats.stalls += 1;
        }
        stall
    }

    /// A delay in microseconds, if one should be injected now.
    pub fn maybe_delay(&mut self) -> Option<u64> {
        self.stats.checks += 1;
        if self.config.delay_us_max == 0 || !self.rng.gen_bool(self.config.delay_probability) {
            return None;
        }
        self.stats.delays += 1;
        Some(self.rng.gen_range(1..=self.config.delay_us_max))
    }

    #[must_use]
    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}
