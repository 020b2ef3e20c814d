//! # imq-dst
//!
//! Deterministic simulation testing for the intrusive MPSC queue.
//!
//! Producers and the consumer are simulated on a single thread. Every push
//! is split into its two phases (the `tail` exchange and the link write)
//! and a seeded scheduler picks which phase of which producer runs next,
//! interleaved with consumer pops. The race window the queue has to
//! survive is therefore reached on purpose, and every run is reproducible
//! from its seed.
//!
//! ## Modules
//!
//! - `runner`: `SimQueue`, `DstRunner`, scripted and random scenarios
//! - `stress`: real threads, checked after they join
//! - `env`, `random`, `clock`, `fault`: the simulated environment
//!
//! ## Reproducibility
//!
//! ```bash
//! DST_SEED=12345 cargo test -p imq-dst
//! DST_ITERATIONS=10000 cargo test -p imq-dst --release
//! ```

pub mod clock;
pub mod env;
pub mod fault;
pub mod random;
pub mod runner;
pub mod stress;

pub use clock::SimClock;
pub use env::{DstEnv, EnvStats};
pub use fault::{FaultConfig, FaultInjector, FaultStats};
pub use random::DeterministicRng;
pub use runner::{
    run_dst_scenario, run_simulation, DstOp, DstResult, DstRunner, DstStats, SimConfig, SimCursor,
    SimQueue,
};
pub use stress::{run_stress, StressConfig, StressReport};

/// `DST_SEED` was set but is not a valid seed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("DST_SEED must be a valid u64, got {value:?}")]
pub struct SeedError {
    pub value: String,
}

/// A simulation or stress configuration that cannot be run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one producer is required")]
    NoProducers,

    #[error("at least one push per producer is required")]
    NoPushes,

    #[error("{name} must be within [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },

    #[error("too many producers for simulation: {0} (max {max})", max = runner::PRODUCERS_MAX)]
    TooManyProducers(u64),
}

/// Read the seed from `DST_SEED`, if set.
pub fn seed_from_env() -> Result<Option<u64>, SeedError> {
    match std::env::var("DST_SEED") {
        Ok(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SeedError { value: s }),
        Err(_) => Ok(None),
    }
}

/// Number of seeds to sweep: `DST_ITERATIONS` if set and valid, else
/// `default`.
#[must_use]
pub fn iterations_from_env(default: u64) -> u64 {
    std::env::var("DST_ITERATIONS")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(default)
}

/// Get DST seed from environment or generate random one.
///
/// Prints the seed for reproduction. Use `DST_SEED=<seed>` to reproduce.
/// An unparsable `DST_SEED` is reported and replaced by a random seed.
#[must_use]
pub fn get_or_generate_seed() -> u64 {
    match seed_from_env() {
        Ok(Some(seed)) => {
            println!("DST_SEED={} (from environment)", seed);
            seed
        }
        Ok(None) => {
            let seed = rand::random::<u64>();
            println!("DST_SEED={} (randomly generated)", seed);
            seed
        }
        Err(e) => {
            let seed = rand::random::<u64>();
            eprintln!("{}; using DST_SEED={} instead", e, seed);
            seed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = SeedError {
            value: "abc".to_string(),
        };
        assert_eq!(e.to_string(), "DST_SEED must be a valid u64, got \"abc\"");
        assert_eq!(
            ConfigError::Probability {
                name: "pop_probability",
                value: 2.0
            }
            .to_string(),
            "pop_probability must be within [0, 1], got 2"
        );
        assert!(ConfigError::TooManyProducers(100).to_string().contains("100"));
    }
}
