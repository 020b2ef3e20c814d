//! Seed sweeps over the simulator with both cursors.

use imq::faulty::ReturnOnCasFailureCursor;
use imq::{Cursor, Entry};
use imq_core::HazardIssue;
use imq_dst::{
    get_or_generate_seed, iterations_from_env, run_dst_scenario, run_simulation, DstOp, DstResult,
    FaultConfig, SimConfig,
};

type Correct = Cursor<Entry>;
type Faulty = ReturnOnCasFailureCursor<Entry>;

fn linked_after_handoff(result: &DstResult) -> bool {
    result
        .hazards()
        .iter()
        .any(|h| matches!(h, HazardIssue::LinkAfterHandOff { .. }))
}

#[test]
fn test_correct_cursor_many_seeds() {
    let base = get_or_generate_seed();
    let config = SimConfig::quick();
    for i in 0..iterations_from_env(200) {
        let seed = base.wrapping_add(i);
        let result = run_simulation::<Correct>(seed, &config).unwrap();
        assert!(result.passed, "{}", result.format());
        assert_eq!(result.stats.delivered, 40);
    }
}

#[test]
fn test_correct_cursor_aggressive_faults() {
    let base = get_or_generate_seed();
    let config = SimConfig {
        producers: 6,
        pushes_per_producer: 50,
        pop_probability: 0.6,
        fault_config: FaultConfig::aggressive(),
        invariant_check_interval: 10,
    };
    let mut inconsistent = 0;
    for i in 0..20 {
        let result = run_simulation::<Correct>(base.wrapping_add(i), &config).unwrap();
        assert!(result.passed, "{}", result.format());
        inconsistent += result.stats.inconsistent_pops;
    }
    // Stalled links make the race window common; the sweep must hit it.
    assert!(inconsistent > 0);
}

#[test]
fn test_faulty_cursor_caught_by_sweep() {
    let config = SimConfig {
        producers: 4,
        pushes_per_producer: 30,
        pop_probability: 0.6,
        fault_config: FaultConfig::aggressive(),
        invariant_check_interval: 10,
    };
    let failing = (0..50u64)
        .map(|seed| run_simulation::<Faulty>(seed, &config).unwrap())
        .find(|r| !r.passed)
        .expect("no seed exposed the faulty cursor");

    // Every failure of this cursor starts with a node handed out while its
    // link was still owed.
    assert!(linked_after_handoff(&failing), "{}", failing.format());
    assert!(failing.has_violation("already handed to the consumer"));
    let ce = failing.counterexample.as_ref().unwrap();
    assert!(ce.render_diagram().contains(&format!("DST_SEED={}", failing.stats.seed)));
}

#[test]
fn test_same_seed_same_outcome_for_faulty_cursor() {
    let config = SimConfig {
        fault_config: FaultConfig::aggressive(),
        ..SimConfig::quick()
    };
    for seed in 0..10 {
        let a = run_simulation::<Faulty>(seed, &config).unwrap();
        let b = run_simulation::<Faulty>(seed, &config).unwrap();
        assert_eq!(a.passed, b.passed);
        assert_eq!(a.violations, b.violations);
        assert_eq!(a.stats.delivered, b.stats.delivered);
        assert_eq!(a.stats.steps, b.stats.steps);
    }
}

#[test]
fn test_scripted_race_window_both_cursors() {
    use DstOp::{Commit, Pop, Push, Reserve};
    let ops = [Push(0), Reserve(1), Pop, Pop, Commit(1), Pop, Pop];

    let correct = run_dst_scenario::<Correct>(0, &ops);
    assert!(correct.passed, "{}", correct.format());
    assert_eq!(correct.stats.delivered, 2);

    assert!(correct.hazards().is_empty());
    assert!(!linked_after_handoff(&correct));

    let faulty = run_dst_scenario::<Faulty>(0, &ops);
    assert!(!faulty.passed);
    assert!(linked_after_handoff(&faulty));
    assert!(faulty.has_violation("already handed to the consumer"));
    assert!(faulty.has_violation("EventualDelivery"));
}
