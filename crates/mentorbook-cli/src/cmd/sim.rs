//! `mb sim`: deterministic simulation campaigns against an in-memory store.
//!
//! `mb sim run`: execute a campaign across many seeds.
//! `mb sim replay`: replay a single seed with its full trace.

use anyhow::{Result, bail};
use clap::{Args, Subcommand, ValueEnum};
use mentorbook_core::config::{SyncStrategy, WriteMode};
use mentorbook_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use mentorbook_sim::oracle::InvariantViolation;
use serde::Serialize;
use std::io::{self, Write};

use crate::output::{OutputMode, pretty_kv, pretty_section};

#[derive(Args, Debug)]
pub struct SimArgs {
    #[command(subcommand)]
    pub command: SimCommand,
}

#[derive(Subcommand, Debug)]
pub enum SimCommand {
    #[command(
        about = "Run a simulation campaign across multiple seeds",
        long_about = "Drive simulated mentor and staff sessions against one event and check\n\
                      partition, capacity, lost-update and cache-convergence invariants\n\
                      after every seed. Reports the first failing seed for replay.",
        after_help = "EXAMPLES:\n    # Run 100 seeds with defaults\n    mb sim run --seeds 100\n\n\
                      # Show what last-write-wins loses\n    mb sim run --write-mode last-write-wins\n\n\
                      # Machine-readable output\n    mb sim run --seeds 50 --json"
    )]
    Run(SimRunArgs),

    #[command(
        about = "Replay a single seed with detailed trace output",
        after_help = "EXAMPLES:\n    mb sim replay --seed 42\n    mb sim replay --seed 42 --rounds 96 --json"
    )]
    Replay(SimReplayArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Conditional,
    LastWriteWins,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SyncArg {
    Patch,
    Refetch,
}

/// Parameters shared by `run` and `replay`.
#[derive(Args, Debug)]
pub struct SimParams {
    #[arg(long, default_value = "5")]
    pub mentors: usize,

    #[arg(long, default_value = "2")]
    pub staff: usize,

    #[arg(long, default_value = "48")]
    pub rounds: u64,

    /// Mentors the simulated event needs.
    #[arg(long, default_value = "2")]
    pub capacity: u32,

    /// Chance (percent) that a held plan is committed when its agent is scheduled.
    #[arg(long, default_value = "50")]
    pub commit_percent: u8,

    #[arg(long, value_enum, default_value = "conditional")]
    pub write_mode: ModeArg,

    #[arg(long, value_enum, default_value = "patch")]
    pub sync: SyncArg,

    /// Let staff accept beyond the event's capacity.
    #[arg(long)]
    pub no_capacity: bool,
}

#[derive(Args, Debug)]
pub struct SimRunArgs {
    /// Number of seeds to run.
    #[arg(long, default_value = "100")]
    pub seeds: u64,

    /// Starting seed value.
    #[arg(long, default_value = "0")]
    pub seed_start: u64,

    #[command(flatten)]
    pub params: SimParams,
}

#[derive(Args, Debug)]
pub struct SimReplayArgs {
    #[arg(long)]
    pub seed: u64,

    #[command(flatten)]
    pub params: SimParams,
}

impl SimParams {
    const fn campaign(&self, seed_start: u64, seeds: u64) -> CampaignConfig {
        CampaignConfig {
            seed_range: seed_start..seed_start.saturating_add(seeds),
            mentor_count: self.mentors,
            staff_count: self.staff,
            rounds: self.rounds,
            required_mentor_count: self.capacity,
            commit_percent: self.commit_percent,
            write_mode: match self.write_mode {
                ModeArg::Conditional => WriteMode::Conditional,
                ModeArg::LastWriteWins => WriteMode::LastWriteWins,
            },
            enforce_capacity: !self.no_capacity,
            sync: match self.sync {
                SyncArg::Patch => SyncStrategy::Patch,
                SyncArg::Refetch => SyncStrategy::Refetch,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct RunOutput {
    seeds_run: usize,
    seeds_passed: usize,
    seeds_failed: usize,
    first_failure: Option<u64>,
    interesting_states_reached: usize,
    stale_reads: usize,
    lost_updates: usize,
    overbookings: usize,
    write_mode: WriteMode,
    all_passed: bool,
    failures: Vec<mentorbook_sim::campaign::SeedFailure>,
}

#[derive(Debug, Serialize)]
struct ReplayOutput<'a> {
    seed: u64,
    trace: &'a [mentorbook_sim::TraceEntry],
    violations: &'a [InvariantViolation],
    failures: usize,
    interesting_state_reached: bool,
    final_version: u64,
}

/// Execute `mb sim run`. Any failing seed makes the command fail.
///
/// # Errors
///
/// Returns an error for an invalid configuration, an internal simulation
/// error, or when at least one seed violates an invariant.
pub fn run_sim_run(args: &SimRunArgs, output: OutputMode) -> Result<()> {
    let config = args.params.campaign(args.seed_start, args.seeds);
    let report = run_campaign(&config)?;

    let out = RunOutput {
        seeds_run: report.seeds_run,
        seeds_passed: report.seeds_passed,
        seeds_failed: report.failures.len(),
        first_failure: report.first_failure,
        interesting_states_reached: report.interesting_states_reached,
        stale_reads: report.stale_reads,
        lost_updates: report.lost_updates,
        overbookings: report.overbookings,
        write_mode: config.write_mode,
        all_passed: report.all_passed(),
        failures: report.failures.clone(),
    };

    let stdout = io::stdout();
    let mut w = stdout.lock();
    match output {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut w, &out)?;
            writeln!(w)?;
        }
        OutputMode::Text => {
            writeln!(
                w,
                "campaign seeds_run={} write_mode={} rounds={}",
                out.seeds_run, out.write_mode, args.params.rounds
            )?;
            writeln!(
                w,
                "results passed={} failed={} stale_reads={} lost_updates={} interesting_states={}",
                out.seeds_passed,
                out.seeds_failed,
                out.stale_reads,
                out.lost_updates,
                out.interesting_states_reached
            )?;
            for failure in out.failures.iter().take(5) {
                writeln!(
                    w,
                    "failure seed={} violations={}",
                    failure.seed,
                    failure.violations.len()
                )?;
            }
        }
        OutputMode::Pretty => {
            pretty_section(&mut w, "Simulation Campaign")?;
            pretty_kv(&mut w, "Seeds", out.seeds_run.to_string())?;
            pretty_kv(&mut w, "Write mode", out.write_mode.as_str())?;
            pretty_kv(&mut w, "Rounds", args.params.rounds.to_string())?;
            pretty_kv(
                &mut w,
                "Results",
                format!(
                    "{} passed / {} failed ({} interesting states)",
                    out.seeds_passed, out.seeds_failed, out.interesting_states_reached
                ),
            )?;
            pretty_kv(
                &mut w,
                "Contention",
                format!(
                    "{} stale reads, {} lost updates, {} overbookings",
                    out.stale_reads, out.lost_updates, out.overbookings
                ),
            )?;
            if let Some(first) = out.first_failure {
                writeln!(w)?;
                pretty_section(&mut w, "Failure Samples")?;
                for failure in out.failures.iter().take(5) {
                    writeln!(w, "seed {:<8} violations={}", failure.seed, failure.violations.len())?;
                    for violation in &failure.violations {
                        writeln!(w, "  - {violation}")?;
                    }
                }
                writeln!(w)?;
                pretty_kv(&mut w, "Replay", format!("mb sim replay --seed {first}"))?;
            } else {
                pretty_kv(&mut w, "Status", "all seeds passed")?;
            }
        }
    }

    if !out.all_passed {
        bail!("{} of {} seeds failed", out.seeds_failed, out.seeds_run);
    }
    Ok(())
}

/// Execute `mb sim replay`.
///
/// # Errors
///
/// Returns an error for an invalid configuration, an internal simulation
/// error, or when the seed violates an invariant.
pub fn run_sim_replay(args: &SimReplayArgs, output: OutputMode) -> Result<()> {
    let config = args.params.campaign(args.seed, 1);
    let trace = replay_seed(args.seed, &config)?;
    let failures = trace.failures().len();

    let out = ReplayOutput {
        seed: args.seed,
        trace: &trace.result.trace,
        violations: &trace.oracle.violations,
        failures,
        interesting_state_reached: trace.result.interesting_state_reached(),
        final_version: trace.result.final_event.version,
    };

    let stdout = io::stdout();
    let mut w = stdout.lock();
    match output {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut w, &out)?;
            writeln!(w)?;
        }
        OutputMode::Text | OutputMode::Pretty => {
            if output == OutputMode::Pretty {
                pretty_section(&mut w, &format!("Replay Seed {}", out.seed))?;
            }
            for entry in out.trace {
                writeln!(w, "{}", serde_json::to_string(entry)?)?;
            }
            writeln!(
                w,
                "result trace_entries={} final_version={} interesting_state_reached={} failures={}",
                out.trace.len(),
                out.final_version,
                out.interesting_state_reached,
                out.failures
            )?;
            for violation in out.violations {
                writeln!(w, "violation {violation}")?;
            }
        }
    }

    if failures > 0 {
        bail!("seed {} failed {failures} invariant checks", args.seed);
    }
    Ok(())
}
