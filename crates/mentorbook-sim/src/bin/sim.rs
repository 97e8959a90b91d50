#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use mentorbook_core::config::{SyncStrategy, WriteMode};
use mentorbook_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Conditional,
    LastWriteWins,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyncArg {
    Patch,
    Refetch,
}

/// Run seeded simulations of concurrent mentor request traffic.
#[derive(Debug, Parser)]
#[command(name = "mentorbook-sim", version)]
struct Args {
    /// First seed to run.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Number of consecutive seeds.
    #[arg(long, default_value_t = 100)]
    seeds: u64,

    #[arg(long, default_value_t = 5)]
    mentors: usize,

    #[arg(long, default_value_t = 2)]
    staff: usize,

    #[arg(long, default_value_t = 48)]
    rounds: u64,

    /// Mentors the simulated event needs.
    #[arg(long, default_value_t = 2)]
    capacity: u32,

    /// Chance (percent) that a held plan is committed when its agent is scheduled.
    #[arg(long, default_value_t = 50)]
    commit_percent: u8,

    #[arg(long, value_enum, default_value = "conditional")]
    write_mode: ModeArg,

    #[arg(long, value_enum, default_value = "patch")]
    sync: SyncArg,

    /// Let staff accept beyond the event's capacity.
    #[arg(long)]
    no_capacity: bool,

    /// Print the full trace of one seed instead of running a campaign.
    #[arg(long)]
    replay: Option<u64>,
}

impl Args {
    fn campaign(&self) -> CampaignConfig {
        CampaignConfig {
            seed_range: self.seed..self.seed.saturating_add(self.seeds),
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

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MENTORBOOK_LOG")
                .unwrap_or_else(|_| EnvFilter::new("mentorbook_sim=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.campaign();

    if let Some(seed) = args.replay {
        let trace = replay_seed(seed, &config)?;
        println!("{}", serde_json::to_string_pretty(&trace.result.trace)?);
        for violation in &trace.oracle.violations {
            println!("{violation}");
        }
        if !trace.failures().is_empty() {
            bail!("seed {seed} failed");
        }
        return Ok(());
    }

    let report = run_campaign(&config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.all_passed() {
        bail!(
            "{} of {} seeds failed (first: {:?})",
            report.failures.len(),
            report.seeds_run,
            report.first_failure
        );
    }
    Ok(())
}
