//! `mb token mint`: unsigned identity tokens for local use.
//!
//! The engine never verifies signatures; a deployment's auth provider
//! issues the real tokens. Minted tokens carry the same claims shape.

use anyhow::Result;
use clap::{Args, Subcommand};
use mentorbook_core::Role;
use mentorbook_core::identity::IdentityClaims;
use serde::Serialize;
use std::io::Write;

use crate::output::{CliError, OutputMode, render, render_error};

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[command(subcommand)]
    pub command: TokenCommand,
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    /// Print an unsigned token for a subject and roles.
    #[command(
        after_help = "EXAMPLES:\n    export MENTORBOOK_TOKEN=$(mb token mint m-ada mentor)\n    \
                      mb token mint s-bo staff mentoring-management --name \"Bo\""
    )]
    Mint(MintArgs),
}

#[derive(Args, Debug)]
pub struct MintArgs {
    pub subject: String,

    /// Roles to claim: mentor, staff, mentoring-management, super-admin.
    #[arg(required = true)]
    pub roles: Vec<Role>,

    /// Display name claim.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Minted {
    token: String,
    claims: IdentityClaims,
}

/// # Errors
///
/// Returns an error if the claims cannot be encoded.
pub fn run_token(args: &TokenArgs, output: OutputMode) -> Result<()> {
    match &args.command {
        TokenCommand::Mint(mint) => run_mint(mint, output),
    }
}

fn run_mint(args: &MintArgs, output: OutputMode) -> Result<()> {
    let mut claims = IdentityClaims::new(args.subject.clone(), args.roles.iter().copied().map(Role::as_str));
    claims.display_name.clone_from(&args.name);

    let token = match claims.encode_unsigned() {
        Ok(token) => token,
        Err(err) => {
            render_error(output, &CliError::from(&err))?;
            return Err(err.into());
        }
    };
    render(output, &Minted { token, claims }, |m, w| writeln!(w, "{}", m.token))
}
