use proptest::prelude::*;

use mentorbook_core::config::{SyncStrategy, WriteMode};
use mentorbook_sim::oracle::BookingOracle;
use mentorbook_sim::{SimulationConfig, Simulator};

fn arb_config() -> impl Strategy<Value = SimulationConfig> {
    (
        any::<u64>(),
        1_usize..6,
        1_usize..4,
        8_u64..64,
        1_u32..4,
        10_u8..=100,
        prop_oneof![Just(SyncStrategy::Patch), Just(SyncStrategy::Refetch)],
    )
        .prop_map(
            |(seed, mentor_count, staff_count, rounds, required, commit_percent, sync)| {
                SimulationConfig {
                    seed,
                    mentor_count,
                    staff_count,
                    rounds,
                    required_mentor_count: required,
                    commit_percent,
                    write_mode: WriteMode::Conditional,
                    enforce_capacity: true,
                    sync,
                }
            },
        )
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(32))]

    #[test]
    fn conditional_writes_hold_every_invariant(config in arb_config()) {
        let mut sim = Simulator::new(config).expect("world");
        let result = sim.run().expect("run");
        let oracle = BookingOracle::check_all(&result);
        prop_assert!(oracle.passed(), "{:?}", oracle.violations);
    }

    #[test]
    fn last_write_wins_still_keeps_rows_partitioned(seed in any::<u64>()) {
        let config = SimulationConfig {
            seed,
            write_mode: WriteMode::LastWriteWins,
            ..SimulationConfig::default()
        };
        let mut sim = Simulator::new(config).expect("world");
        let result = sim.run().expect("run");
        let oracle = BookingOracle::check_all(&result);
        prop_assert!(oracle.failures(&config).is_empty(), "{:?}", oracle.violations);
    }
}
