//! `mb create`: create a new event as staff.

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use clap::Args;
use mentorbook_core::model::{EventDraft, Schedule};
use mentorbook_core::{MentorId, StaffId};

use crate::context::Context;
use crate::view::EventView;

use super::transition::render_outcome;

fn parse_start(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, "%H:%M").map_err(|err| format!("expected HH:MM ({err})"))
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[arg(short, long)]
    pub title: String,

    /// Event date (YYYY-MM-DD).
    #[arg(long)]
    pub date: NaiveDate,

    /// Start time (HH:MM).
    #[arg(long, value_parser = parse_start)]
    pub start: NaiveTime,

    /// Length in minutes.
    #[arg(long, default_value_t = 60)]
    pub duration: u32,

    /// Mentors needed. Defaults to `defaults.required_mentor_count`.
    #[arg(long)]
    pub required: Option<u32>,

    /// Mentor allowed to see and request the event (repeatable).
    #[arg(short, long = "mentor")]
    pub mentors: Vec<String>,

    /// Additional staff member (repeatable). The creator is added when absent.
    #[arg(long)]
    pub staff: Vec<String>,

    #[arg(short, long)]
    pub description: Option<String>,
}

impl CreateArgs {
    fn draft(&self) -> EventDraft {
        let mut draft = EventDraft::new(
            self.title.clone(),
            Schedule::new(self.date, self.start, self.duration),
        );
        draft.description.clone_from(&self.description);
        draft.required_mentor_count = self.required;
        draft.staff_members = self.staff.iter().map(|s| StaffId::from(s.as_str())).collect();
        draft.initial_selected_mentors =
            self.mentors.iter().map(|m| MentorId::from(m.as_str())).collect();
        draft
    }
}

/// # Errors
///
/// Returns an error when no session can be opened or the engine rejects
/// the draft.
pub fn run_create(args: &CreateArgs, ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let outcome = session
        .create_event(args.draft())
        .map_err(|err| ctx.fail(err))?;
    tracing::info!(event = %outcome.event.id, "event created");
    render_outcome(ctx, "Created", &EventView::from(&outcome.event))
}
