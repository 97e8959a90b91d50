#![forbid(unsafe_code)]

mod cmd;
mod context;
mod output;
mod view;

use clap::{Parser, Subcommand};
use cmd::transition::{MentorChange, StaffDecision};
use context::Context;
use mentorbook_core::Role;
use mentorbook_core::config::resolve_config;
use std::env;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "mb",
    author,
    version,
    about = "mentorbook: mentor booking for staff-run events",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Identity token (overrides MENTORBOOK_TOKEN and the user config).
    #[arg(long, global = true)]
    token: Option<String>,

    /// Act under a different role than the one signed in with.
    #[arg(long, global = true)]
    role: Option<Role>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a mentorbook project",
        long_about = "Create .mentorbook/ with a config template and a migrated event store.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    mb init\n\n    # Rewrite the config template\n    mb init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Work with identity tokens",
        after_help = "EXAMPLES:\n    # Sign in as a mentor for this shell\n    export MENTORBOOK_TOKEN=$(mb token mint m-ada mentor)"
    )]
    Token(cmd::token::TokenArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Show the signed-in identity",
        after_help = "EXAMPLES:\n    mb whoami\n    mb whoami --role mentor --json"
    )]
    Whoami,

    #[command(
        next_help_heading = "Events",
        about = "Create an event",
        long_about = "Create an event as staff. The creator becomes its primary staff member.",
        after_help = "EXAMPLES:\n    # A two-mentor career day open to two mentors\n    mb create --title \"Career day\" --date 2031-05-20 --start 10:00 \\\n        --duration 90 --required 2 -m m-ada -m m-bo\n\n    # Emit machine-readable output\n    mb create --title \"Fair\" --date 2031-06-01 --start 09:00 --json"
    )]
    Create(cmd::create::CreateArgs),

    #[command(
        next_help_heading = "Events",
        about = "List visible events",
        long_about = "List events the active role may see, earliest first.",
        after_help = "EXAMPLES:\n    # Everything visible\n    mb list\n\n    # Events still needing mentors\n    mb list --status firstRequests --upcoming\n\n    # Emit machine-readable output\n    mb list --json"
    )]
    List(cmd::list::ListArgs),

    #[command(
        next_help_heading = "Events",
        about = "Show one event",
        after_help = "EXAMPLES:\n    mb show ev-3f9a2c1b7d04\n    mb show ev-3f9a2c1b7d04 --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Events",
        about = "Lock an event against further requests"
    )]
    Lock(cmd::admin::EventArgs),

    #[command(next_help_heading = "Events", about = "Unlock an event")]
    Unlock(cmd::admin::EventArgs),

    #[command(next_help_heading = "Events", about = "Delete an event")]
    Delete(cmd::admin::EventArgs),

    #[command(
        next_help_heading = "Mentor requests",
        about = "Request to mentor at an event",
        after_help = "EXAMPLES:\n    mb request ev-3f9a2c1b7d04"
    )]
    Request(cmd::transition::MentorArgs),

    #[command(
        next_help_heading = "Mentor requests",
        about = "Withdraw a pending request"
    )]
    Withdraw(cmd::transition::MentorArgs),

    #[command(
        next_help_heading = "Mentor requests",
        about = "Accept a requesting mentor",
        after_help = "EXAMPLES:\n    mb accept ev-3f9a2c1b7d04 m-ada"
    )]
    Accept(cmd::transition::StaffArgs),

    #[command(
        next_help_heading = "Mentor requests",
        about = "Decline a requesting mentor"
    )]
    Decline(cmd::transition::StaffArgs),

    #[command(
        next_help_heading = "Development",
        about = "Deterministic simulation campaigns"
    )]
    Sim(cmd::sim::SimArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MENTORBOOK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "mentorbook=debug,info"
        } else {
            "mentorbook=info,warn"
        })
    });

    let format = env::var("MENTORBOOK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = env::current_dir()?;
    let config = resolve_config(&project_root, cli.json)?;
    let ctx = Context::new(project_root, config, cli.token.clone(), cli.role);

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, ctx.output, &ctx.root),
        Commands::Token(args) => cmd::token::run_token(args, ctx.output),
        Commands::Whoami => cmd::whoami::run_whoami(&ctx),
        Commands::Create(args) => cmd::create::run_create(args, &ctx),
        Commands::List(args) => cmd::list::run_list(args, &ctx),
        Commands::Show(args) => cmd::show::run_show(args, &ctx),
        Commands::Lock(args) => cmd::admin::run_lock(args, &ctx),
        Commands::Unlock(args) => cmd::admin::run_unlock(args, &ctx),
        Commands::Delete(args) => cmd::admin::run_delete(args, &ctx),
        Commands::Request(args) => cmd::transition::run_mentor(MentorChange::Request, args, &ctx),
        Commands::Withdraw(args) => {
            cmd::transition::run_mentor(MentorChange::Withdraw, args, &ctx)
        }
        Commands::Accept(args) => cmd::transition::run_staff(StaffDecision::Accept, args, &ctx),
        Commands::Decline(args) => {
            cmd::transition::run_staff(StaffDecision::Decline, args, &ctx)
        }
        Commands::Sim(args) => match &args.command {
            cmd::sim::SimCommand::Run(run) => cmd::sim::run_sim_run(run, ctx.output),
            cmd::sim::SimCommand::Replay(replay) => cmd::sim::run_sim_replay(replay, ctx.output),
        },
    }
}
