//! `mb init`: create the `.mentorbook/` state directory and event store.

use anyhow::{Context as _, Result};
use clap::Args;
use mentorbook_core::config::{STATE_DIR, store_path};
use mentorbook_core::persist::migrations::LATEST_SCHEMA_VERSION;
use mentorbook_core::persist::sqlite::SqliteRepository;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::output::{OutputMode, render_mode};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite config.toml even if `.mentorbook/` already exists.
    #[arg(long)]
    pub force: bool,
}

const CONFIG_TOML: &str = "[protocol]\n\
    # \"conditional\" rejects writes planned on an outdated row; \"last-write-wins\" overwrites.\n\
    write_mode = \"conditional\"\n\
    enforce_capacity = true\n\
    \n\
    [sync]\n\
    # \"patch\" updates the written row in place; \"refetch\" reloads every event.\n\
    strategy = \"patch\"\n\
    \n\
    [defaults]\n\
    required_mentor_count = 1\n";

const GITIGNORE: &str = "events.sqlite3\nevents.sqlite3-wal\nevents.sqlite3-shm\n";

#[derive(Debug, Serialize)]
struct InitOutput {
    state_dir: String,
    store: String,
    schema_version: u32,
}

/// Execute `mb init`:
///
/// ```text
/// .mentorbook/
///   config.toml      (engine config template)
///   events.sqlite3   (event store, migrated to the latest schema)
///   .gitignore
/// ```
///
/// # Errors
///
/// Returns an error if `.mentorbook/` already exists and `--force` is not
/// set, or if any filesystem or database operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let state_dir = project_root.join(STATE_DIR);
    if state_dir.exists() && !args.force {
        anyhow::bail!("{STATE_DIR}/ already exists. Use `mb init --force` to reinitialize.");
    }

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let config_path = state_dir.join("config.toml");
    std::fs::write(&config_path, CONFIG_TOML)
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

    let gitignore_path = state_dir.join(".gitignore");
    std::fs::write(&gitignore_path, GITIGNORE)
        .with_context(|| format!("Failed to write .gitignore: {}", gitignore_path.display()))?;

    let store = store_path(project_root);
    SqliteRepository::open(&store)
        .with_context(|| format!("Failed to create event store: {}", store.display()))?;
    tracing::info!(store = %store.display(), "event store ready");

    let result = InitOutput {
        state_dir: state_dir.display().to_string(),
        store: store.display().to_string(),
        schema_version: LATEST_SCHEMA_VERSION,
    };
    render_mode(
        output,
        &result,
        |r, w| writeln!(w, "initialized {}", r.state_dir),
        |r, w| {
            writeln!(w, "✓ Initialized {STATE_DIR}/")?;
            writeln!(w)?;
            writeln!(w, "  Store:  {} (schema v{})", r.store, r.schema_version)?;
            writeln!(w, "  Config: {STATE_DIR}/config.toml")?;
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(w, "  export MENTORBOOK_TOKEN=$(mb token mint you staff)")?;
            writeln!(w, "  mb create --title \"Career day\" --date 2031-05-20 --start 10:00")
        },
    )
}
