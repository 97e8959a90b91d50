//! `mb show`: full detail of one event.

use anyhow::Result;
use clap::Args;
use mentorbook_core::{EngineError, EventId};
use std::io::Write;

use crate::context::Context;
use crate::output::render_mode;
use crate::view::EventView;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Event ID.
    pub id: String,
}

/// Events hidden from a mentor by the allowlist are reported as not found.
///
/// # Errors
///
/// Returns an error when no session can be opened or the event is not
/// visible to the active role.
pub fn run_show(args: &ShowArgs, ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let id = EventId::from(args.id.as_str());
    let event = session
        .visible_events()
        .map_err(|err| ctx.fail(err))?
        .into_iter()
        .find(|event| event.id == id)
        .ok_or_else(|| ctx.fail(EngineError::EventNotFound(id)))?;

    let view = EventView::from(&event);
    render_mode(
        ctx.output,
        &view,
        |v, w| {
            writeln!(
                w,
                "{}  {} {}-{}  {}  {}/{}  v{}  {}",
                v.id,
                v.date,
                v.start,
                v.end,
                v.status.as_str(),
                v.membership.accepted.len(),
                v.required_mentor_count,
                v.version,
                v.title
            )
        },
        EventView::render_detail,
    )
}
