//! imq-dst-runner: CLI for running seeded simulations of the queue.
//!
//! # Usage
//!
//! ```bash
//! imq-dst-runner --seed 42 --iterations 1000 --producers 4 --pushes 100
//! imq-dst-runner --cursor return-on-cas-failure --json
//! imq-dst-runner --stress --producers 8 --pushes 100000
//! ```
//!
//! Seeds for iteration `i` are `seed + i`, so a failing iteration can be
//! rerun alone with `--seed <reported seed> --iterations 1`. The process
//! exits with status 1 if any run fails.

use std::process;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use imq::faulty::ReturnOnCasFailureCursor;
use imq::{Cursor, Entry};
use imq_dst::{
    get_or_generate_seed, iterations_from_env, run_simulation, run_stress, ConfigError, DstResult,
    FaultConfig, SimConfig, SimCursor, StressConfig,
};

/// Maximum simulation iterations per invocation.
const ITERATIONS_MAX: u64 = 1_000_000;

const ITERATIONS_DEFAULT: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CursorKind {
    /// Withholds the node while a producer is mid-link.
    Correct,
    /// Hands the node out anyway; expected to fail.
    ReturnOnCasFailure,
}

/// Run deterministic simulations (or a real-thread stress run) and report.
#[derive(Parser, Debug)]
#[command(name = "imq-dst-runner")]
#[command(about = "Deterministic simulation runner for the intrusive MPSC queue")]
struct Cli {
    /// Base seed (DST_SEED or random if not set).
    #[arg(long)]
    seed: Option<u64>,

    /// Number of simulations to run (DST_ITERATIONS or 100 if not set).
    #[arg(long)]
    iterations: Option<u64>,

    /// Number of producers.
    #[arg(long, default_value_t = 4)]
    producers: u64,

    /// Pushes per producer.
    #[arg(long, default_value_t = 100)]
    pushes: u64,

    /// Cursor implementation to simulate.
    #[arg(long, value_enum, default_value_t = CursorKind::Correct)]
    cursor: CursorKind,

    /// Stall producers between their exchange and their link more often.
    #[arg(long)]
    aggressive: bool,

    /// Keep going after the first failing seed.
    #[arg(long)]
    keep_going: bool,

    /// Run real threads instead of the simulator.
    #[arg(long)]
    stress: bool,

    /// Emit JSON on stdout instead of text.
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imq_dst=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail_config(e: &ConfigError, as_json: bool) -> ! {
    if as_json {
        println!("{}", json!({ "passed": false, "error": e.to_string() }));
    } else {
        eprintln!("Error: {e}");
    }
    process::exit(2);
}

fn run_stress_mode(cli: &Cli) -> bool {
    let config = StressConfig {
        producers: cli.producers,
        pushes_per_producer: cli.pushes,
        ..StressConfig::default()
    };
    let report = match run_stress(&config) {
        Ok(r) => r,
        Err(e) => fail_config(&e, cli.json),
    };
    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => error!("failed to serialize report: {e}"),
        }
    } else {
        println!("{}", report.format());
    }
    report.passed
}

fn run_simulations<C: SimCursor>(cli: &Cli, config: &SimConfig, base_seed: u64) -> bool {
    let iterations = cli
        .iterations
        .unwrap_or_else(|| iterations_from_env(ITERATIONS_DEFAULT))
        .clamp(1, ITERATIONS_MAX);
    let mut failures: Vec<DstResult> = Vec::new();
    let mut ran = 0u64;

    for i in 0..iterations {
        let seed = base_seed.wrapping_add(i);
        let result = match run_simulation::<C>(seed, config) {
            Ok(r) => r,
            Err(e) => fail_config(&e, cli.json),
        };
        ran += 1;
        if !result.passed {
            error!(seed, "simulation failed");
            if !cli.json {
                println!("{}", result.format());
                if let Some(ce) = &result.counterexample {
                    println!("{}", ce.render_diagram());
                }
            }
            failures.push(result);
            if !cli.keep_going {
                break;
            }
        }
    }

    let passed = failures.is_empty();
    if cli.json {
        let out = json!({
            "cursor": C::NAME,
            "base_seed": base_seed,
            "iterations": ran,
            "passed": passed,
            "config": config,
            "failures": failures,
        });
        match serde_json::to_string_pretty(&out) {
            Ok(s) => println!("{s}"),
            Err(e) => error!("failed to serialize results: {e}"),
        }
    } else {
        println!(
            "{} {}: {}/{} seeds passed (base DST_SEED={})",
            if passed { "PASS" } else { "FAIL" },
            C::NAME,
            ran - failures.len() as u64,
            ran,
            base_seed
        );
    }
    passed
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let passed = if cli.stress {
        run_stress_mode(&cli)
    } else {
        let base_seed = cli.seed.unwrap_or_else(get_or_generate_seed);
        let config = SimConfig {
            producers: cli.producers,
            pushes_per_producer: cli.pushes,
            fault_config: if cli.aggressive {
                FaultConfig::aggressive()
            } else {
                FaultConfig::default()
            },
            ..SimConfig::default()
        };
        info!(base_seed, cursor = ?cli.cursor, "starting");
        match cli.cursor {
            CursorKind::Correct => run_simulations::<Cursor<Entry>>(&cli, &config, base_seed),
            CursorKind::ReturnOnCasFailure => {
                run_simulations::<ReturnOnCasFailureCursor<Entry>>(&cli, &config, base_seed)
            }
        }
    };

    if !passed {
        process::exit(1);
    }
}
