//! Serializable projections of engine types for command output.

use std::io::{self, Write};

use mentorbook_core::model::MembershipSets;
use mentorbook_core::{Event, MentorId, Status};
use serde::Serialize;

use crate::output::{Renderable, pretty_kv, pretty_section};

fn joined(ids: &[MentorId]) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter().map(MentorId::as_str).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: String,
    pub start: String,
    pub end: String,
    pub duration_minutes: u32,
    pub status: Status,
    pub required_mentor_count: u32,
    pub open_slots: u32,
    pub locked: bool,
    pub membership: MembershipSets,
    pub staff_members: Vec<String>,
    pub allowed_mentors: Vec<MentorId>,
    pub version: u64,
}

impl From<&Event> for EventView {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.to_string(),
            title: event.title.clone(),
            description: event.description.clone(),
            date: event.schedule.date.format("%Y-%m-%d").to_string(),
            start: event.schedule.start.format("%H:%M").to_string(),
            end: event.schedule.end().format("%H:%M").to_string(),
            duration_minutes: event.schedule.duration_minutes,
            status: event.status(),
            required_mentor_count: event.required_mentor_count,
            open_slots: event.open_slots(),
            locked: event.locked,
            membership: event.membership.clone(),
            staff_members: event.staff_members.iter().map(ToString::to_string).collect(),
            allowed_mentors: event.initial_selected_mentors.clone(),
            version: event.version,
        }
    }
}

impl EventView {
    pub fn render_detail(&self, w: &mut dyn Write) -> io::Result<()> {
        pretty_section(w, &format!("{}  {}", self.id, self.title))?;
        pretty_kv(w, "When", format!("{} {}-{}", self.date, self.start, self.end))?;
        pretty_kv(w, "Status", self.status.as_str())?;
        pretty_kv(
            w,
            "Mentors",
            format!(
                "{} of {} accepted",
                self.membership.accepted.len(),
                self.required_mentor_count
            ),
        )?;
        pretty_kv(w, "Requesting", joined(&self.membership.requesting))?;
        pretty_kv(w, "Accepted", joined(&self.membership.accepted))?;
        pretty_kv(w, "Declined", joined(&self.membership.declined))?;
        pretty_kv(w, "Staff", self.staff_members.join(", "))?;
        if self.locked {
            pretty_kv(w, "Locked", "yes")?;
        }
        if let Some(description) = &self.description {
            writeln!(w)?;
            writeln!(w, "{description}")?;
        }
        Ok(())
    }
}

impl Renderable for EventView {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{:<18} {} {}  {:<16} {}/{}  {}",
            self.id,
            self.date,
            self.start,
            self.status.as_str(),
            self.membership.accepted.len(),
            self.required_mentor_count,
            self.title
        )
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(&mut *w, self).map_err(io::Error::other)?;
        writeln!(w)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}  {}  {}  {}  {}/{}  {}",
            self.id,
            self.date,
            self.start,
            self.status.as_str(),
            self.membership.accepted.len(),
            self.required_mentor_count,
            self.title
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["ID", "DATE", "START", "STATUS", "ACCEPTED", "TITLE"]
    }
}

#[cfg(test)]
mod tests {
    use super::EventView;
    use crate::output::Renderable;
    use chrono::{NaiveDate, NaiveTime};
    use mentorbook_core::model::{MembershipSets, Schedule};
    use mentorbook_core::{Event, Status};

    fn event() -> Event {
        let created = NaiveDate::from_ymd_opt(2031, 5, 1)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .expect("valid");
        Event {
            id: "ev-0001".into(),
            title: "Career day".into(),
            description: None,
            schedule: Schedule::new(
                NaiveDate::from_ymd_opt(2031, 5, 20).expect("valid"),
                NaiveTime::from_hms_opt(10, 0, 0).expect("valid"),
                90,
            ),
            required_mentor_count: 2,
            membership: MembershipSets {
                accepted: vec!["m1".into()],
                requesting: vec!["m2".into()],
                declined: Vec::new(),
            },
            locked: false,
            staff_members: vec!["s-ada".into()],
            product_id: None,
            initial_selected_mentors: vec!["m1".into(), "m2".into()],
            required_traits: Vec::new(),
            version: 3,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn view_derives_status_and_times() {
        let view = EventView::from(&event());
        assert_eq!(view.status, Status::SuccessPartly);
        assert_eq!(view.end, "11:30");
        assert_eq!(view.open_slots, 1);
    }

    #[test]
    fn table_row_matches_headers() {
        let mut buf = Vec::new();
        EventView::from(&event()).render_table(&mut buf).expect("render");
        let row = String::from_utf8(buf).expect("utf8");
        assert_eq!(row, "ev-0001  2031-05-20  10:00  successPartly  1/2  Career day\n");
        assert_eq!(EventView::table_headers().len(), 6);
    }

    #[test]
    fn detail_lists_every_membership_set() {
        let mut buf = Vec::new();
        EventView::from(&event()).render_detail(&mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("Requesting:  m2"));
        assert!(text.contains("1 of 2 accepted"));
    }
}
