use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::{EventId, MentorId, ProductId, StaffId};
use crate::status::{Status, derive_status};

/// A mentor as displayed next to an event. Identity lifecycle is external.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mentor {
    pub id: MentorId,
    pub display_name: String,
}

/// Date, start time and duration of an event.
///
/// The end is always derived from `start` and `duration_minutes`; there is no
/// stored end to drift out of sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub duration_minutes: u32,
}

impl Schedule {
    #[must_use]
    pub const fn new(date: NaiveDate, start: NaiveTime, duration_minutes: u32) -> Self {
        Self {
            date,
            start,
            duration_minutes,
        }
    }

    #[must_use]
    pub fn start_at(&self) -> NaiveDateTime {
        NaiveDateTime::new(self.date, self.start)
    }

    /// End instant; may fall on the following day.
    #[must_use]
    pub fn end_at(&self) -> NaiveDateTime {
        self.start_at() + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Wall-clock end time.
    #[must_use]
    pub fn end(&self) -> NaiveTime {
        self.end_at().time()
    }

    /// Whether the event start lies before `now`.
    #[must_use]
    pub fn has_started(&self, now: NaiveDateTime) -> bool {
        self.start_at() < now
    }
}

/// One of the three mutually exclusive membership sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipColumn {
    Requesting,
    Accepted,
    Declined,
}

impl MembershipColumn {
    pub const ALL: [Self; 3] = [Self::Requesting, Self::Accepted, Self::Declined];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requesting => "requesting",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }
}

impl fmt::Display for MembershipColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mentor membership of an event. A mentor appears in at most one list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipSets {
    pub requesting: Vec<MentorId>,
    pub accepted: Vec<MentorId>,
    pub declined: Vec<MentorId>,
}

impl MembershipSets {
    #[must_use]
    pub fn get(&self, column: MembershipColumn) -> &[MentorId] {
        match column {
            MembershipColumn::Requesting => &self.requesting,
            MembershipColumn::Accepted => &self.accepted,
            MembershipColumn::Declined => &self.declined,
        }
    }

    /// The set currently holding `mentor`, if any.
    #[must_use]
    pub fn column_of(&self, mentor: &MentorId) -> Option<MembershipColumn> {
        MembershipColumn::ALL
            .into_iter()
            .find(|column| self.get(*column).contains(mentor))
    }

    /// True when no mentor is listed twice, within or across sets.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        let mut seen = HashSet::new();
        MembershipColumn::ALL
            .into_iter()
            .flat_map(|column| self.get(column))
            .all(|mentor| seen.insert(mentor))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requesting.is_empty() && self.accepted.is_empty() && self.declined.is_empty()
    }
}

/// One bookable engagement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub description: Option<String>,
    pub schedule: Schedule,
    pub required_mentor_count: u32,
    pub membership: MembershipSets,
    /// The only independently settable input to [`Event::status`].
    pub locked: bool,
    /// Owning staff, first entry is the primary contact.
    pub staff_members: Vec<StaffId>,
    pub product_id: Option<ProductId>,
    /// Product allowlist captured at creation; gates mentor visibility.
    pub initial_selected_mentors: Vec<MentorId>,
    pub required_traits: Vec<String>,
    /// Row version stamp, bumped by the repository on every write.
    pub version: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Event {
    #[must_use]
    pub fn status(&self) -> Status {
        derive_status(self)
    }

    #[must_use]
    pub fn primary_staff(&self) -> Option<&StaffId> {
        self.staff_members.first()
    }

    #[must_use]
    pub fn is_past(&self, now: NaiveDateTime) -> bool {
        self.schedule.has_started(now)
    }

    #[must_use]
    pub fn accepted_count(&self) -> u32 {
        u32::try_from(self.membership.accepted.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.accepted_count() >= self.required_mentor_count
    }

    #[must_use]
    pub fn open_slots(&self) -> u32 {
        self.required_mentor_count
            .saturating_sub(self.accepted_count())
    }

    /// Check the structural invariants every stored event must satisfy.
    ///
    /// Overbooking (`accepted > required`) is not structural: it can arise
    /// under last-write-wins concurrency and is reported by the simulator
    /// oracle instead.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as a human-readable reason.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        validate_shape(
            &self.schedule,
            self.required_mentor_count,
            &self.staff_members,
        )?;
        if !self.membership.is_partitioned() {
            return Err("a mentor appears in more than one membership set".to_string());
        }
        Ok(())
    }
}

/// Staff input for a new event. The engine assigns id, version and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    pub description: Option<String>,
    pub schedule: Schedule,
    /// Falls back to the product's minimum, then to the configured default.
    pub required_mentor_count: Option<u32>,
    pub staff_members: Vec<StaffId>,
    pub product_id: Option<ProductId>,
    /// Allowlist used when no product is given.
    pub initial_selected_mentors: Vec<MentorId>,
    pub required_traits: Vec<String>,
}

impl EventDraft {
    #[must_use]
    pub fn new(title: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            title: title.into(),
            description: None,
            schedule,
            required_mentor_count: None,
            staff_members: Vec::new(),
            product_id: None,
            initial_selected_mentors: Vec::new(),
            required_traits: Vec::new(),
        }
    }
}

pub(crate) fn validate_shape(
    schedule: &Schedule,
    required_mentor_count: u32,
    staff_members: &[StaffId],
) -> Result<(), String> {
    if required_mentor_count == 0 {
        return Err("required mentor count must be at least 1".to_string());
    }
    if schedule.duration_minutes == 0 {
        return Err("duration must be at least one minute".to_string());
    }
    if staff_members.is_empty() {
        return Err("an event needs at least one staff member".to_string());
    }
    Ok(())
}
