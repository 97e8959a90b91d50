//! Per-invocation context: project root, resolved config, identity, and the
//! SQLite-backed session opened from them.
//!
//! Identity token resolution: `--token` flag > `MENTORBOOK_TOKEN` env >
//! `token` in the user config file.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use mentorbook_core::catalog::MemoryCatalog;
use mentorbook_core::clock::SystemClock;
use mentorbook_core::config::{EffectiveConfig, STATE_DIR, store_path};
use mentorbook_core::identity::IdentityClaims;
use mentorbook_core::persist::sqlite::SqliteRepository;
use mentorbook_core::push::PushHub;
use mentorbook_core::session::{Collaborators, Session};
use mentorbook_core::{EngineError, Role};

use crate::output::{CliError, OutputMode, render_error};

pub const TOKEN_ENV: &str = "MENTORBOOK_TOKEN";

#[derive(Debug)]
pub struct Context {
    pub root: PathBuf,
    pub config: EffectiveConfig,
    pub output: OutputMode,
    token_flag: Option<String>,
    role: Option<Role>,
}

fn resolve_token(
    flag: Option<&str>,
    env_token: Option<&str>,
    user_token: Option<&str>,
) -> Option<String> {
    [flag, env_token, user_token]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

impl Context {
    pub fn new(
        root: PathBuf,
        config: EffectiveConfig,
        token_flag: Option<String>,
        role: Option<Role>,
    ) -> Self {
        let output = OutputMode::from_resolved(&config.resolved_output);
        Self {
            root,
            config,
            output,
            token_flag,
            role,
        }
    }

    fn claims(&self) -> Result<IdentityClaims> {
        let env_token = env::var(TOKEN_ENV).ok();
        let Some(token) = resolve_token(
            self.token_flag.as_deref(),
            env_token.as_deref(),
            self.config.user.token.as_deref(),
        ) else {
            render_error(
                self.output,
                &CliError::with_details(
                    "no identity token",
                    format!("Pass --token, set {TOKEN_ENV}, or mint one with `mb token mint`"),
                    "E1002",
                ),
            )?;
            bail!("no identity token");
        };
        IdentityClaims::decode(&token).map_err(|err| self.fail(err))
    }

    /// Open the durable store and start a session for the resolved identity,
    /// switching to `--role` when given.
    pub fn open_session(&self) -> Result<Session> {
        require_initialized(&self.root)?;
        let claims = self.claims()?;

        let hub = Arc::new(PushHub::new());
        let path = store_path(&self.root);
        let repo = SqliteRepository::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .with_publisher(hub.clone());
        let collaborators = Collaborators {
            repo: Arc::new(repo),
            push: hub,
            catalog: Arc::new(MemoryCatalog::new()),
            clock: Arc::new(SystemClock),
        };

        let mut session = Session::start(&claims, &collaborators, &self.config.engine)
            .map_err(|err| self.fail(err))?;
        if let Some(role) = self.role {
            session.switch_role(role).map_err(|err| self.fail(err))?;
        }
        Ok(session)
    }

    /// Report an engine error in the active output mode and hand it back for `?`.
    pub fn fail(&self, err: EngineError) -> anyhow::Error {
        if let Err(render_err) = render_error(self.output, &CliError::from(&err)) {
            tracing::warn!(error = %render_err, "could not render error");
        }
        anyhow::Error::new(err)
    }
}

fn require_initialized(root: &Path) -> Result<()> {
    if !root.join(STATE_DIR).is_dir() {
        bail!("{STATE_DIR}/ not found. Run `mb init` first.");
    }
    Ok(())
}
