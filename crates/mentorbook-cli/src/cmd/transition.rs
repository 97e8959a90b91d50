//! `mb request`, `mb withdraw`, `mb accept`, `mb decline`: membership
//! transitions on one event.
//!
//! Mentors request and withdraw for themselves; staff accept or decline a
//! requesting mentor. Each command is one read-plan-write cycle through the
//! session's protocol, so a concurrent change to the row surfaces as a
//! `StaleRead` error under the conditional write mode.

use anyhow::Result;
use clap::Args;
use mentorbook_core::{EventId, MentorId};
use std::io::Write;

use crate::context::Context;
use crate::output::render_mode;
use crate::view::EventView;

#[derive(Args, Debug)]
pub struct MentorArgs {
    /// Event ID.
    pub id: String,
}

#[derive(Args, Debug)]
pub struct StaffArgs {
    /// Event ID.
    pub id: String,

    /// Mentor whose request is being processed.
    pub mentor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentorChange {
    Request,
    Withdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffDecision {
    Accept,
    Decline,
}

impl MentorChange {
    const fn verb(self) -> &'static str {
        match self {
            Self::Request => "Requested",
            Self::Withdraw => "Withdrew from",
        }
    }
}

impl StaffDecision {
    const fn verb(self) -> &'static str {
        match self {
            Self::Accept => "Accepted mentor on",
            Self::Decline => "Declined mentor on",
        }
    }
}

/// Print an event after a successful write.
pub fn render_outcome(ctx: &Context, verb: &str, view: &EventView) -> Result<()> {
    render_mode(
        ctx.output,
        view,
        |v, w| writeln!(w, "{verb} {} ({}, v{})", v.id, v.status.as_str(), v.version),
        |v, w| {
            writeln!(w, "✓ {verb} {}", v.id)?;
            writeln!(w)?;
            v.render_detail(w)
        },
    )
}

/// # Errors
///
/// Returns an error when no session can be opened or the protocol rejects
/// the request.
pub fn run_mentor(change: MentorChange, args: &MentorArgs, ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let id = EventId::from(args.id.as_str());
    let outcome = match change {
        MentorChange::Request => session.request(&id),
        MentorChange::Withdraw => session.withdraw(&id),
    }
    .map_err(|err| ctx.fail(err))?;
    render_outcome(ctx, change.verb(), &EventView::from(&outcome.event))
}

/// # Errors
///
/// Returns an error when no session can be opened or the protocol rejects
/// the decision.
pub fn run_staff(decision: StaffDecision, args: &StaffArgs, ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let id = EventId::from(args.id.as_str());
    let mentor = MentorId::from(args.mentor.as_str());
    let outcome = match decision {
        StaffDecision::Accept => session.accept(&id, &mentor),
        StaffDecision::Decline => session.decline(&id, &mentor),
    }
    .map_err(|err| ctx.fail(err))?;
    tracing::debug!(event = %id, %mentor, ?decision, "request processed");
    render_outcome(ctx, decision.verb(), &EventView::from(&outcome.event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: StaffArgs,
    }

    #[test]
    fn staff_args_take_event_then_mentor() {
        let w = Wrapper::parse_from(["test", "ev-1", "m-7"]);
        assert_eq!(w.args.id, "ev-1");
        assert_eq!(w.args.mentor, "m-7");
    }

    #[test]
    fn verbs_read_naturally() {
        assert_eq!(MentorChange::Request.verb(), "Requested");
        assert_eq!(StaffDecision::Decline.verb(), "Declined mentor on");
    }
}
