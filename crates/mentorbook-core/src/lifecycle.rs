//! Staff-side event operations: create, edit, lock, delete.
//!
//! Writes share the protocol's [`RowWriter`], so they obey the same write
//! mode and cache refresh strategy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;

use crate::catalog::ProductCatalog;
use crate::config::DefaultsConfig;
use crate::error::{EngineError, Ineligibility};
use crate::model::event::validate_shape;
use crate::model::{Event, EventDraft, EventId, MembershipSets, Schedule, StaffId};
use crate::permissions::{Actor, Capability, delete_capability, edit_capability};
use crate::persist::EventPatch;
use crate::protocol::{Outcome, RowWriter};
use crate::status::derive_status;

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// `ev-` followed by 12 hex chars of a blake3 digest over the creator, the
/// creation instant and a per-process sequence number.
#[must_use]
pub fn new_event_id(creator: &str, now: NaiveDateTime) -> EventId {
    let sequence = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut hasher = blake3::Hasher::new();
    hasher.update(creator.as_bytes());
    hasher.update(&now.and_utc().timestamp_micros().to_le_bytes());
    hasher.update(&sequence.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    EventId::new(format!("ev-{}", &hex.as_str()[..12]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Update,
    Delete,
}

pub struct EventLifecycle {
    writer: Arc<RowWriter>,
    catalog: Arc<dyn ProductCatalog>,
    defaults: DefaultsConfig,
}

impl std::fmt::Debug for EventLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLifecycle")
            .field("writer", &self.writer)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl EventLifecycle {
    #[must_use]
    pub fn new(
        writer: Arc<RowWriter>,
        catalog: Arc<dyn ProductCatalog>,
        defaults: DefaultsConfig,
    ) -> Self {
        Self {
            writer,
            catalog,
            defaults,
        }
    }

    /// Create an event from `draft`.
    ///
    /// When `draft.product_id` is set, the product's approved mentors and
    /// trait list are snapshotted into the event and its minimum mentor
    /// count fills an unset `required_mentor_count`.
    ///
    /// # Errors
    ///
    /// [`EngineError::PermissionDenied`], [`EngineError::ProductNotFound`],
    /// [`EngineError::InvalidEvent`], `NotEligible(EventPast)`, or a
    /// repository failure.
    pub fn create_event(&self, actor: &Actor, draft: EventDraft) -> Result<Outcome, EngineError> {
        actor.require(Capability::CreateEvents)?;
        let now = self.writer.now();
        if draft.schedule.has_started(now) {
            return Err(Ineligibility::EventPast.into());
        }
        if draft.title.trim().is_empty() {
            return Err(EngineError::invalid("title must not be empty"));
        }

        let product = match &draft.product_id {
            Some(product_id) => Some(
                self.catalog
                    .product(product_id)
                    .map_err(EngineError::RemoteReadFailure)?
                    .ok_or_else(|| EngineError::ProductNotFound(product_id.clone()))?,
            ),
            None => None,
        };

        let required_mentor_count = draft
            .required_mentor_count
            .or_else(|| product.as_ref().map(|p| p.min_mentor_count))
            .unwrap_or(self.defaults.required_mentor_count);

        let creator = actor.staff_id();
        let mut staff_members = draft.staff_members;
        if !staff_members.contains(&creator) {
            staff_members.insert(0, creator);
        }

        let (initial_selected_mentors, required_traits) = match product {
            Some(product) => (product.approved_mentors, product.required_traits),
            None => (draft.initial_selected_mentors, draft.required_traits),
        };

        let event = Event {
            id: new_event_id(actor.id(), now),
            title: draft.title.trim().to_string(),
            description: draft.description,
            schedule: draft.schedule,
            required_mentor_count,
            membership: MembershipSets::default(),
            locked: false,
            staff_members,
            product_id: draft.product_id,
            initial_selected_mentors,
            required_traits,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        event.validate().map_err(EngineError::invalid)?;

        let stored = self.writer.insert(&event)?;
        tracing::info!(
            event = %stored.id,
            creator = %actor.id(),
            required = stored.required_mentor_count,
            product = ?stored.product_id,
            "event created"
        );
        Ok(outcome(stored))
    }

    /// # Errors
    ///
    /// Edit permission, validation or repository failures.
    pub fn update_schedule(
        &self,
        actor: &Actor,
        event_id: &EventId,
        schedule: Schedule,
    ) -> Result<Outcome, EngineError> {
        let event = self.editable(actor, event_id, Edit::Update)?;
        validate_shape(&schedule, event.required_mentor_count, &event.staff_members)
            .map_err(EngineError::invalid)?;
        let mut patch = EventPatch::at(self.writer.now());
        patch.schedule = Some(schedule);
        self.write(&event, &patch, "schedule updated")
    }

    /// Change the headcount target. Lowering it below the number of already
    /// accepted mentors is rejected.
    ///
    /// # Errors
    ///
    /// Edit permission, validation or repository failures.
    pub fn set_required_mentor_count(
        &self,
        actor: &Actor,
        event_id: &EventId,
        required: u32,
    ) -> Result<Outcome, EngineError> {
        let event = self.editable(actor, event_id, Edit::Update)?;
        if required == 0 {
            return Err(EngineError::invalid("required mentor count must be at least 1"));
        }
        if required < event.accepted_count() {
            return Err(EngineError::invalid(format!(
                "{} mentors are already accepted",
                event.accepted_count()
            )));
        }
        let mut patch = EventPatch::at(self.writer.now());
        patch.required_mentor_count = Some(required);
        self.write(&event, &patch, "required mentor count updated")
    }

    /// # Errors
    ///
    /// Edit permission, an empty staff list, or repository failures.
    pub fn set_staff_members(
        &self,
        actor: &Actor,
        event_id: &EventId,
        staff: Vec<StaffId>,
    ) -> Result<Outcome, EngineError> {
        let event = self.editable(actor, event_id, Edit::Update)?;
        if staff.is_empty() {
            return Err(EngineError::invalid("an event needs at least one staff member"));
        }
        let mut patch = EventPatch::at(self.writer.now());
        patch.staff_members = Some(staff);
        self.write(&event, &patch, "staff members updated")
    }

    /// # Errors
    ///
    /// Edit permission, a blank title, or repository failures.
    pub fn update_details(
        &self,
        actor: &Actor,
        event_id: &EventId,
        title: &str,
        description: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let event = self.editable(actor, event_id, Edit::Update)?;
        if title.trim().is_empty() {
            return Err(EngineError::invalid("title must not be empty"));
        }
        let mut patch = EventPatch::at(self.writer.now());
        patch.title = Some(title.trim().to_string());
        patch.description = Some(description);
        self.write(&event, &patch, "details updated")
    }

    /// Set the lock flag. Past events may be locked.
    ///
    /// # Errors
    ///
    /// [`EngineError::PermissionDenied`] without `canLockEvents`, or
    /// repository failures.
    pub fn lock(&self, actor: &Actor, event_id: &EventId) -> Result<Outcome, EngineError> {
        self.set_locked(actor, event_id, true)
    }

    /// Clear the lock flag; the returned status reflects current membership.
    ///
    /// # Errors
    ///
    /// Same as [`Self::lock`].
    pub fn unlock(&self, actor: &Actor, event_id: &EventId) -> Result<Outcome, EngineError> {
        self.set_locked(actor, event_id, false)
    }

    /// # Errors
    ///
    /// Delete permission (past events need `canDeletePastEvents`) or
    /// repository failures.
    pub fn delete_event(&self, actor: &Actor, event_id: &EventId) -> Result<(), EngineError> {
        let event = self.editable(actor, event_id, Edit::Delete)?;
        self.writer.commit_delete(&event.id, event.version)?;
        tracing::info!(event = %event.id, actor = %actor.id(), "event deleted");
        Ok(())
    }

    fn set_locked(
        &self,
        actor: &Actor,
        event_id: &EventId,
        locked: bool,
    ) -> Result<Outcome, EngineError> {
        actor.require(Capability::LockEvents)?;
        let event = self.writer.read(event_id)?;
        let patch = EventPatch::at(self.writer.now()).with_locked(locked);
        self.write(&event, &patch, if locked { "event locked" } else { "event unlocked" })
    }

    fn editable(&self, actor: &Actor, event_id: &EventId, edit: Edit) -> Result<Event, EngineError> {
        let now = self.writer.now();
        let event = self.writer.read(event_id)?;
        let capability = match edit {
            Edit::Update => edit_capability(&event, now),
            Edit::Delete => delete_capability(&event, now),
        };
        actor.require(capability)?;
        Ok(event)
    }

    fn write(&self, event: &Event, patch: &EventPatch, what: &str) -> Result<Outcome, EngineError> {
        let stored = self.writer.commit(&event.id, patch, event.version)?;
        let outcome = outcome(stored);
        tracing::info!(
            event = %outcome.event.id,
            status = %outcome.status,
            version = outcome.event.version,
            "{what}"
        );
        Ok(outcome)
    }
}

fn outcome(event: Event) -> Outcome {
    let status = derive_status(&event);
    Outcome { event, status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::clock::FixedClock;
    use crate::config::{SyncStrategy, WriteMode};
    use crate::model::event::fixtures::{at, mentors, sample_event};
    use crate::model::{Product, Role};
    use crate::persist::EventRepository;
    use crate::persist::memory::MemoryRepository;
    use crate::status::Status;
    use crate::store::EventStore;

    struct Rig {
        repo: Arc<MemoryRepository>,
        store: Arc<EventStore>,
        clock: Arc<FixedClock>,
        lifecycle: EventLifecycle,
    }

    fn rig() -> Rig {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(&sample_event()).expect("insert");
        let store = Arc::new(EventStore::new(repo.clone()));
        store.load().expect("load");
        let clock = Arc::new(FixedClock::new(at((2031, 5, 1), (12, 0))));
        let writer = Arc::new(RowWriter::new(
            repo.clone(),
            store.clone(),
            clock.clone(),
            WriteMode::Conditional,
            SyncStrategy::Patch,
        ));
        let catalog: MemoryCatalog = [Product {
            id: "p-workshop".into(),
            name: "Workshop".to_string(),
            min_mentor_count: 3,
            approved_mentors: mentors(&["m1", "m4"]),
            required_traits: vec!["first-aid".to_string()],
        }]
        .into_iter()
        .collect();
        let lifecycle = EventLifecycle::new(writer, Arc::new(catalog), DefaultsConfig::default());
        Rig {
            repo,
            store,
            clock,
            lifecycle,
        }
    }

    fn staff() -> Actor {
        Actor::new("s-ada", vec![Role::Staff]).expect("actor")
    }

    fn management() -> Actor {
        Actor::new("s-mm", vec![Role::MentoringManagement]).expect("actor")
    }

    fn id() -> EventId {
        "ev-sample".into()
    }

    fn draft() -> EventDraft {
        let start = at((2031, 6, 1), (10, 0));
        EventDraft::new("Open lab", Schedule::new(start.date(), start.time(), 60))
    }

    #[test]
    fn event_ids_are_short_and_distinct() {
        let now = at((2031, 1, 1), (0, 0));
        let a = new_event_id("s-ada", now);
        let b = new_event_id("s-ada", now);
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 15);
        assert!(a.as_str().starts_with("ev-"));
    }

    #[test]
    fn create_without_product_uses_defaults() {
        let rig = rig();
        let mut draft = draft();
        draft.initial_selected_mentors = mentors(&["m2"]);
        let outcome = rig.lifecycle.create_event(&staff(), draft).expect("create");

        assert_eq!(outcome.status, Status::New);
        assert_eq!(outcome.event.required_mentor_count, 1);
        assert_eq!(outcome.event.primary_staff().map(StaffId::as_str), Some("s-ada"));
        assert_eq!(outcome.event.initial_selected_mentors, mentors(&["m2"]));
        assert_eq!(outcome.event.version, 1);
        assert!(rig.store.get_by_id(&outcome.event.id).is_some());
    }

    #[test]
    fn create_from_product_snapshots_lists() {
        let rig = rig();
        let mut draft = draft();
        draft.product_id = Some("p-workshop".into());
        draft.staff_members = vec!["s-bo".into()];
        let event = rig.lifecycle.create_event(&staff(), draft).expect("create").event;

        assert_eq!(event.required_mentor_count, 3);
        assert_eq!(event.initial_selected_mentors, mentors(&["m1", "m4"]));
        assert_eq!(event.required_traits, ["first-aid"]);
        let staff: Vec<&str> = event.staff_members.iter().map(StaffId::as_str).collect();
        assert_eq!(staff, ["s-ada", "s-bo"]);
    }

    #[test]
    fn create_rejects_unknown_product_and_past_start() {
        let rig = rig();
        let mut unknown = draft();
        unknown.product_id = Some("p-none".into());
        assert!(matches!(
            rig.lifecycle.create_event(&staff(), unknown),
            Err(EngineError::ProductNotFound(_))
        ));

        let start = at((2031, 4, 1), (10, 0));
        let past = EventDraft::new("Late", Schedule::new(start.date(), start.time(), 60));
        assert!(matches!(
            rig.lifecycle.create_event(&staff(), past),
            Err(EngineError::NotEligible(Ineligibility::EventPast))
        ));

        let mentor = Actor::new("m1", vec![Role::Mentor]).expect("actor");
        assert!(matches!(
            rig.lifecycle.create_event(&mentor, draft()),
            Err(EngineError::PermissionDenied { .. })
        ));
        assert_eq!(rig.repo.len(), 1);
    }

    #[test]
    fn lock_then_unlock_recomputes_status() {
        let rig = rig();
        let mut accepted = sample_event().membership;
        accepted.accepted = mentors(&["m1"]);
        let patch = EventPatch::at(at((2031, 5, 1), (12, 0))).with_membership(accepted);
        rig.repo.update(&id(), &patch, None).expect("seed membership");

        let locked = rig.lifecycle.lock(&staff(), &id()).expect("lock");
        assert_eq!(locked.status, Status::Locked);
        let unlocked = rig.lifecycle.unlock(&staff(), &id()).expect("unlock");
        assert_eq!(unlocked.status, Status::SuccessPartly);
        assert!(!unlocked.event.locked);
    }

    #[test]
    fn capacity_cannot_drop_below_accepted() {
        let rig = rig();
        let sets = MembershipSets {
            accepted: mentors(&["m1", "m2"]),
            ..MembershipSets::default()
        };
        let patch = EventPatch::at(at((2031, 5, 1), (12, 0))).with_membership(sets);
        rig.repo.update(&id(), &patch, None).expect("seed membership");

        assert!(matches!(
            rig.lifecycle.set_required_mentor_count(&staff(), &id(), 1),
            Err(EngineError::InvalidEvent { .. })
        ));
        let raised = rig
            .lifecycle
            .set_required_mentor_count(&staff(), &id(), 3)
            .expect("raise");
        assert_eq!(raised.status, Status::SuccessPartly);
    }

    #[test]
    fn past_events_need_management_to_edit_or_delete() {
        let rig = rig();
        rig.clock.set(at((2031, 6, 1), (0, 0)));

        let err = rig
            .lifecycle
            .update_details(&staff(), &id(), "Renamed", None)
            .expect_err("staff cannot edit past events");
        assert!(matches!(
            err,
            EngineError::PermissionDenied {
                capability: Capability::EditPastEvents,
                ..
            }
        ));
        assert!(rig.lifecycle.delete_event(&staff(), &id()).is_err());

        let renamed = rig
            .lifecycle
            .update_details(&management(), &id(), "  Renamed ", Some("notes".to_string()))
            .expect("management edits past events");
        assert_eq!(renamed.event.title, "Renamed");
        assert_eq!(renamed.event.description.as_deref(), Some("notes"));

        rig.lifecycle.lock(&staff(), &id()).expect("locking past events is allowed");
        rig.lifecycle.delete_event(&management(), &id()).expect("delete");
        assert!(rig.store.get_by_id(&id()).is_none());
        assert!(rig.repo.is_empty());
    }

    #[test]
    fn staff_and_schedule_edits_validate_input() {
        let rig = rig();
        assert!(matches!(
            rig.lifecycle.set_staff_members(&staff(), &id(), Vec::new()),
            Err(EngineError::InvalidEvent { .. })
        ));
        let moved = rig
            .lifecycle
            .set_staff_members(&staff(), &id(), vec!["s-bo".into()])
            .expect("reassign");
        assert_eq!(moved.event.primary_staff().map(StaffId::as_str), Some("s-bo"));

        let mut schedule = sample_event().schedule;
        schedule.duration_minutes = 0;
        assert!(rig.lifecycle.update_schedule(&staff(), &id(), schedule).is_err());
        schedule.duration_minutes = 45;
        let updated = rig.lifecycle.update_schedule(&staff(), &id(), schedule).expect("reschedule");
        assert_eq!(updated.event.schedule.duration_minutes, 45);
    }
}
