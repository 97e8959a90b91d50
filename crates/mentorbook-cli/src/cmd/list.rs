//! `mb list`: events visible to the active role.

use anyhow::Result;
use chrono::Local;
use clap::Args;
use mentorbook_core::Status;
use std::io;

use crate::context::Context;
use crate::output::render_list;
use crate::view::EventView;

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Only events with this status (new, firstRequests, successPartly,
    /// successComplete, locked).
    #[arg(short, long)]
    pub status: Option<Status>,

    /// Hide events that have already started.
    #[arg(long)]
    pub upcoming: bool,
}

impl ListArgs {
    fn keeps(&self, view: &EventView, started: bool) -> bool {
        self.status.is_none_or(|status| view.status == status) && !(self.upcoming && started)
    }
}

/// # Errors
///
/// Returns an error when no session can be opened or output fails.
pub fn run_list(args: &ListArgs, ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let now = Local::now().naive_local();
    let mut events = session.visible_events().map_err(|err| ctx.fail(err))?;
    events.sort_by_key(|event| (event.schedule.start_at(), event.id.clone()));

    let views: Vec<EventView> = events
        .iter()
        .map(|event| (EventView::from(event), event.is_past(now)))
        .filter(|(view, started)| args.keeps(view, *started))
        .map(|(view, _)| view)
        .collect();

    tracing::debug!(count = views.len(), role = %session.actor().active_role(), "listing events");
    let stdout = io::stdout();
    let mut out = stdout.lock();
    render_list(&views, ctx.output, &mut out)?;
    Ok(())
}
