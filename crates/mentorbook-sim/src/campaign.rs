//! Campaign runner for deterministic simulation campaigns.
//!
//! Executes many seeds with the same parameters, collecting pass/fail
//! results and identifying the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use mentorbook_core::config::{SyncStrategy, WriteMode};
use serde::{Deserialize, Serialize};

use crate::oracle::{BookingOracle, InvariantViolation, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Campaign-level configuration: which seeds to run and the simulation
/// parameters shared by every seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub mentor_count: usize,
    pub staff_count: usize,
    pub rounds: u64,
    pub required_mentor_count: u32,
    pub commit_percent: u8,
    pub write_mode: WriteMode,
    pub enforce_capacity: bool,
    pub sync: SyncStrategy,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            mentor_count: sim.mentor_count,
            staff_count: sim.staff_count,
            rounds: sim.rounds,
            required_mentor_count: sim.required_mentor_count,
            commit_percent: sim.commit_percent,
            write_mode: sim.write_mode,
            enforce_capacity: sim.enforce_capacity,
            sync: sim.sync,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            mentor_count: self.mentor_count,
            staff_count: self.staff_count,
            rounds: self.rounds,
            required_mentor_count: self.required_mentor_count,
            commit_percent: self.commit_percent,
            write_mode: self.write_mode,
            enforce_capacity: self.enforce_capacity,
            sync: self.sync,
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds where at least one write raced another session.
    pub interesting_states_reached: usize,
    pub stale_reads: usize,
    pub lost_updates: usize,
    pub overbookings: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One seed's run together with its oracle verdict.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

impl DetailedTrace {
    /// Violations the seed's configuration does not tolerate.
    #[must_use]
    pub fn failures(&self) -> Vec<&InvariantViolation> {
        self.oracle.failures(&self.result.config)
    }
}

/// Run every seed in the config.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation encounters
/// an internal error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport::default();
    for seed in config.seed_range.clone() {
        let trace = replay_seed(seed, config)?;
        report.seeds_run += 1;
        report.stale_reads += trace.result.stale_reads();
        report.lost_updates += trace
            .oracle
            .count(|v| matches!(v, InvariantViolation::LostUpdate { .. }));
        report.overbookings += trace
            .oracle
            .count(|v| matches!(v, InvariantViolation::Overbooked { .. }));
        if trace.result.interesting_state_reached() {
            report.interesting_states_reached += 1;
        }

        let failures = trace.failures();
        if failures.is_empty() {
            report.seeds_passed += 1;
        } else {
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: failures.iter().map(ToString::to_string).collect(),
            });
        }
    }

    tracing::info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        stale_reads = report.stale_reads,
        lost_updates = report.lost_updates,
        "campaign finished"
    );
    Ok(report)
}

/// Replay a single seed with full trace details for debugging.
///
/// # Errors
///
/// Returns an error when config validation or simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = BookingOracle::check_all(&result);
    Ok(DetailedTrace { result, oracle })
}
