//! The simulation environment: one seed, all sources of nondeterminism.

use std::fmt;

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector, FaultStats};
use crate::random::DeterministicRng;

const STREAM_FAULT: u64 = 1;

/// Everything a simulation may draw on, derived from a single seed.
#[derive(Debug, Clone)]
pub struct DstEnv {
    seed: u64,
    rng: DeterministicRng,
    clock: SimClock,
    fault: FaultInjector,
}

impl DstEnv {
    /// Environment with the default fault configuration.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        let rng = DeterministicRng::new(seed);
        let fault = FaultInjector::new(rng.fork(STREAM_FAULT), config);
        Self {
            seed,
            rng,
            clock: SimClock::new(),
            fault,
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn clock(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    pub fn fault(&mut self) -> &mut FaultInjector {
        &mut self.fault
    }

    /// Advance the clock if the fault injector asks for a delay.
    pub fn maybe_delay(&mut self) {
        if let Some(us) = self.fault.maybe_delay() {
            self.clock.advance_us(us);
        }
    }

    /// `DST_SEED=<seed>`, ready to paste into a shell.
    #[must_use]
    pub fn format_seed(&self) -> String {
        format!("DST_SEED={}", self.seed)
    }

    #[must_use]
    pub fn stats(&self) -> EnvStats {
        EnvStats {
            seed: self.seed,
            elapsed_us: self.clock.now_us(),
            faults: self.fault.stats(),
        }
    }
}

/// Summary of an environment after a run.
#[derive(Debug, Clone, Copy)]
pub struct EnvStats {
    pub seed: u64,
    pub elapsed_us: u64,
    pub faults: FaultStats,
}

impl fmt::Display for EnvStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DST_SEED={} elapsed={}us stalls={} delays={}",
            self.seed, self.elapsed_us, self.faults.stalls, self.faults.delays
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_is_reproducible() {
        let run = |seed| {
            let mut env = DstEnv::new(seed);
            let draws: Vec<u64> = (0..8).map(|_| env.rng().gen_range(0..1000)).collect();
            for _ in 0..50 {
                env.maybe_delay();
            }
            (draws, env.clock().now_ns(), env.fault().should_stall())
        };
        assert_eq!(run(1234), run(1234));
    }

    #[test]
    fn test_format_seed() {
        let env = DstEnv::with_fault_config(77, FaultConfig::none());
        assert_eq!(env.format_seed(), "DST_SEED=77");
        assert!(env.stats().to_string().starts_with("DST_SEED=77 "));
    }
}
