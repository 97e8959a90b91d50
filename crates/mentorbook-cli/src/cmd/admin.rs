//! `mb lock`, `mb unlock`, `mb delete`: event administration.

use anyhow::Result;
use clap::Args;
use mentorbook_core::EventId;
use serde::Serialize;
use std::io::Write;

use crate::context::Context;
use crate::output::render;
use crate::view::EventView;

use super::transition::render_outcome;

#[derive(Args, Debug)]
pub struct EventArgs {
    /// Event ID.
    pub id: String,
}

#[derive(Debug, Serialize)]
struct Deleted {
    id: String,
    deleted: bool,
}

/// # Errors
///
/// Returns an error when no session can be opened or the actor may not
/// lock the event.
pub fn run_lock(args: &EventArgs, ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let outcome = session
        .lock(&EventId::from(args.id.as_str()))
        .map_err(|err| ctx.fail(err))?;
    render_outcome(ctx, "Locked", &EventView::from(&outcome.event))
}

/// # Errors
///
/// Returns an error when no session can be opened or the actor may not
/// unlock the event.
pub fn run_unlock(args: &EventArgs, ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let outcome = session
        .unlock(&EventId::from(args.id.as_str()))
        .map_err(|err| ctx.fail(err))?;
    render_outcome(ctx, "Unlocked", &EventView::from(&outcome.event))
}

/// # Errors
///
/// Returns an error when no session can be opened or the actor may not
/// delete the event.
pub fn run_delete(args: &EventArgs, ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    session
        .delete_event(&EventId::from(args.id.as_str()))
        .map_err(|err| ctx.fail(err))?;
    tracing::info!(event = %args.id, "event deleted");
    render(
        ctx.output,
        &Deleted {
            id: args.id.clone(),
            deleted: true,
        },
        |d, w| writeln!(w, "Deleted {}", d.id),
    )
}
