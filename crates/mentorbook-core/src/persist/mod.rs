//! Persistence collaborator for the event table.
//!
//! Writes are full-row: an [`EventPatch`] carries complete replacement
//! membership arrays, never set deltas. Passing `expected_version` turns an
//! update into a compare-and-swap on the row version stamp; passing `None`
//! is last-write-wins.
//!
//! Implementations:
//! - [`memory::MemoryRepository`]: in-process, used by sessions in tests and
//!   by the simulator
//! - [`sqlite::SqliteRepository`]: durable `SQLite` file (WAL, busy timeout,
//!   versioned migrations)

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::model::{Event, EventId, MembershipSets, Schedule, StaffId};

/// Errors raised by repository and catalog backends.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("event {0} not found")]
    NotFound(EventId),

    #[error("event {0} already exists")]
    Duplicate(EventId),

    #[error("version conflict on {event_id}: expected {expected}, found {found}")]
    VersionConflict {
        event_id: EventId,
        expected: u64,
        found: u64,
    },

    #[error("row rejected: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("column encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("corrupt row {event_id}: {reason}")]
    Corrupt { event_id: String, reason: String },
}

/// Partial update of an event row. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub schedule: Option<Schedule>,
    pub required_mentor_count: Option<u32>,
    /// Complete replacement of all three membership arrays.
    pub membership: Option<MembershipSets>,
    pub locked: Option<bool>,
    pub staff_members: Option<Vec<StaffId>>,
    pub updated_at: NaiveDateTime,
}

impl EventPatch {
    #[must_use]
    pub const fn at(updated_at: NaiveDateTime) -> Self {
        Self {
            title: None,
            description: None,
            schedule: None,
            required_mentor_count: None,
            membership: None,
            locked: None,
            staff_members: None,
            updated_at,
        }
    }

    #[must_use]
    pub fn with_membership(mut self, membership: MembershipSets) -> Self {
        self.membership = Some(membership);
        self
    }

    #[must_use]
    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    /// Apply the patch to `event` without touching its version.
    pub fn apply_to(&self, event: &mut Event) {
        if let Some(title) = &self.title {
            event.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            event.description.clone_from(description);
        }
        if let Some(schedule) = self.schedule {
            event.schedule = schedule;
        }
        if let Some(count) = self.required_mentor_count {
            event.required_mentor_count = count;
        }
        if let Some(membership) = &self.membership {
            event.membership.clone_from(membership);
        }
        if let Some(locked) = self.locked {
            event.locked = locked;
        }
        if let Some(staff) = &self.staff_members {
            event.staff_members.clone_from(staff);
        }
        event.updated_at = self.updated_at;
    }
}

/// CRUD over the event table.
pub trait EventRepository: Send + Sync {
    /// Store a new event; the returned row carries version 1.
    ///
    /// # Errors
    ///
    /// [`PersistError::Duplicate`] when the id exists, backend errors otherwise.
    fn insert(&self, event: &Event) -> Result<Event, PersistError>;

    /// Apply `patch` and bump the version.
    ///
    /// # Errors
    ///
    /// [`PersistError::NotFound`], [`PersistError::VersionConflict`] when
    /// `expected_version` does not match, backend errors otherwise.
    fn update(
        &self,
        id: &EventId,
        patch: &EventPatch,
        expected_version: Option<u64>,
    ) -> Result<Event, PersistError>;

    /// All events ordered by date, start time, then id.
    ///
    /// # Errors
    ///
    /// Backend errors.
    fn select_all(&self) -> Result<Vec<Event>, PersistError>;

    /// # Errors
    ///
    /// Backend errors.
    fn select_one(&self, id: &EventId) -> Result<Option<Event>, PersistError>;

    /// # Errors
    ///
    /// [`PersistError::NotFound`], [`PersistError::VersionConflict`], backend errors.
    fn delete(&self, id: &EventId, expected_version: Option<u64>) -> Result<(), PersistError>;
}

/// Canonical collection order shared by repositories and the store.
#[must_use]
pub fn by_date(a: &Event, b: &Event) -> Ordering {
    a.schedule
        .date
        .cmp(&b.schedule.date)
        .then_with(|| a.schedule.start.cmp(&b.schedule.start))
        .then_with(|| a.id.cmp(&b.id))
}

pub(crate) fn check_version(
    event_id: &EventId,
    expected: Option<u64>,
    found: u64,
) -> Result<(), PersistError> {
    match expected {
        Some(expected) if expected != found => Err(PersistError::VersionConflict {
            event_id: event_id.clone(),
            expected,
            found,
        }),
        _ => Ok(()),
    }
}

pub(crate) fn check_row(event: &Event) -> Result<(), PersistError> {
    event.validate().map_err(PersistError::Rejected)
}

#[cfg(test)]
mod tests {
    use super::{EventPatch, by_date, check_version};
    use crate::model::event::fixtures::{at, mentors, sample_event};
    use crate::model::{MembershipSets, StaffId};
    use std::cmp::Ordering;

    #[test]
    fn patch_replaces_whole_arrays() {
        let mut event = sample_event();
        event.membership.requesting = mentors(&["m1", "m2"]);

        let patch = EventPatch::at(at((2031, 2, 1), (8, 0))).with_membership(MembershipSets {
            requesting: mentors(&["m2"]),
            accepted: mentors(&["m1"]),
            declined: Vec::new(),
        });
        patch.apply_to(&mut event);

        assert_eq!(event.membership.requesting, mentors(&["m2"]));
        assert_eq!(event.membership.accepted, mentors(&["m1"]));
        assert_eq!(event.updated_at, at((2031, 2, 1), (8, 0)));
        assert_eq!(event.version, 1, "apply_to leaves the version to the repository");
    }

    #[test]
    fn empty_patch_only_touches_timestamp() {
        let mut event = sample_event();
        let before = event.clone();
        let mut patch = EventPatch::at(at((2031, 3, 3), (3, 3)));
        patch.staff_members = None;
        patch.apply_to(&mut event);
        assert_eq!(event.updated_at, at((2031, 3, 3), (3, 3)));
        event.updated_at = before.updated_at;
        assert_eq!(event, before);

        let mut patch = EventPatch::at(before.updated_at);
        patch.staff_members = Some(vec![StaffId::from("s-new")]);
        patch.apply_to(&mut event);
        assert_eq!(event.primary_staff().map(StaffId::as_str), Some("s-new"));
    }

    #[test]
    fn version_check_only_applies_when_expected() {
        let id = "ev-1".into();
        assert!(check_version(&id, None, 7).is_ok());
        assert!(check_version(&id, Some(7), 7).is_ok());
        assert!(check_version(&id, Some(6), 7).is_err());
    }

    #[test]
    fn order_is_date_then_start_then_id() {
        let mut early = sample_event();
        early.schedule.date = at((2031, 5, 1), (0, 0)).date();
        let mut late = sample_event();
        late.id = "ev-a".into();
        assert_eq!(by_date(&early, &late), Ordering::Less);

        let mut same = sample_event();
        same.id = "ev-z".into();
        assert_eq!(by_date(&late, &same), Ordering::Less);
    }
}
