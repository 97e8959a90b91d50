//! Mentor request protocol.
//!
//! Per (event, mentor) pair the protocol is a small state machine:
//!
//! ```text
//!   none ──request──▶ requesting ──accept──▶ accepted
//!    ▲                   │  │
//!    └─────withdraw──────┘  └──decline──▶ declined
//! ```
//!
//! There is no path from `accepted` or `declined` back to `requesting`.
//!
//! Every mutation is a full-row read-modify-write. [`MentorRequestProtocol`]
//! reads the row from the repository, a `plan_*` function computes the
//! complete replacement membership arrays, and [`RowWriter::commit`] issues
//! one update. Planning and committing are public so callers can interleave
//! other sessions between them.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::{ProtocolConfig, SyncStrategy, WriteMode};
use crate::error::{EngineError, Ineligibility};
use crate::model::{Event, EventId, MembershipColumn, MembershipSets, MentorId, Role};
use crate::permissions::{Actor, Capability, check_request_eligibility};
use crate::persist::{EventPatch, EventRepository};
use crate::status::{Status, derive_status};
use crate::store::EventStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Request,
    Withdraw,
    Accept,
    Decline,
}

impl Transition {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Withdraw => "withdraw",
            Self::Accept => "accept",
            Self::Decline => "decline",
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A computed but not yet written membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub event_id: EventId,
    pub mentor: MentorId,
    pub transition: Transition,
    /// Version of the row the plan was computed from.
    pub read_version: u64,
    /// Complete replacement arrays.
    pub membership: MembershipSets,
}

/// Result of an acknowledged write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub event: Event,
    pub status: Status,
}

/// Shared write path: one repository update, then a cache refresh.
///
/// A failed write leaves the cache untouched.
pub struct RowWriter {
    repo: Arc<dyn EventRepository>,
    store: Arc<EventStore>,
    clock: Arc<dyn Clock>,
    write_mode: WriteMode,
    sync: SyncStrategy,
}

impl std::fmt::Debug for RowWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowWriter")
            .field("write_mode", &self.write_mode)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl RowWriter {
    #[must_use]
    pub fn new(
        repo: Arc<dyn EventRepository>,
        store: Arc<EventStore>,
        clock: Arc<dyn Clock>,
        write_mode: WriteMode,
        sync: SyncStrategy,
    ) -> Self {
        Self {
            repo,
            store,
            clock,
            write_mode,
            sync,
        }
    }

    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    #[must_use]
    pub const fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn EventRepository> {
        &self.repo
    }

    #[must_use]
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Current row straight from the repository.
    ///
    /// # Errors
    ///
    /// [`EngineError::EventNotFound`] or [`EngineError::RemoteReadFailure`].
    pub fn read(&self, id: &EventId) -> Result<Event, EngineError> {
        self.repo
            .select_one(id)
            .map_err(EngineError::RemoteReadFailure)?
            .ok_or_else(|| EngineError::EventNotFound(id.clone()))
    }

    /// Write `patch` against the row last seen at `read_version`.
    ///
    /// In conditional mode the update only applies when the row still has
    /// that version.
    ///
    /// # Errors
    ///
    /// [`EngineError::StaleRead`], [`EngineError::EventNotFound`],
    /// [`EngineError::InvalidEvent`] or [`EngineError::RemoteWriteFailure`].
    pub fn commit(
        &self,
        id: &EventId,
        patch: &EventPatch,
        read_version: u64,
    ) -> Result<Event, EngineError> {
        let expected = match self.write_mode {
            WriteMode::Conditional => Some(read_version),
            WriteMode::LastWriteWins => None,
        };
        let event = self
            .repo
            .update(id, patch, expected)
            .map_err(EngineError::from_write)?;
        self.refresh(Some(&event), id);
        Ok(event)
    }

    /// Delete the row last seen at `read_version`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::commit`].
    pub fn commit_delete(&self, id: &EventId, read_version: u64) -> Result<(), EngineError> {
        let expected = match self.write_mode {
            WriteMode::Conditional => Some(read_version),
            WriteMode::LastWriteWins => None,
        };
        self.repo.delete(id, expected).map_err(EngineError::from_write)?;
        self.refresh(None, id);
        Ok(())
    }

    /// Insert a new row and make it visible in the cache.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidEvent`] or [`EngineError::RemoteWriteFailure`].
    pub fn insert(&self, event: &Event) -> Result<Event, EngineError> {
        let stored = self.repo.insert(event).map_err(EngineError::from_write)?;
        self.refresh(Some(&stored), &stored.id);
        Ok(stored)
    }

    fn refresh(&self, written: Option<&Event>, id: &EventId) {
        match (self.sync, written) {
            (SyncStrategy::Patch, Some(event)) => {
                self.store.apply_patch(event.clone());
            }
            (SyncStrategy::Patch, None) => {
                self.store.remove(id);
            }
            (SyncStrategy::Refetch, _) => {
                if let Err(err) = self.store.refetch() {
                    // The write is durable; drop the cache so the next read reloads.
                    tracing::warn!(event = %id, %err, "refetch after write failed");
                    self.store.invalidate();
                }
            }
        }
    }
}

/// Request a place on `event` for the acting mentor.
///
/// # Errors
///
/// [`EngineError::NotEligible`]: `WrongRole`, `Locked`, or the first failed
/// precondition of [`check_request_eligibility`].
pub fn plan_request(event: &Event, actor: &Actor, now: NaiveDateTime) -> Result<Plan, EngineError> {
    if actor.active_role() != Role::Mentor {
        return Err(Ineligibility::WrongRole.into());
    }
    if event.locked {
        return Err(Ineligibility::Locked.into());
    }
    check_request_eligibility(event, actor, now)?;
    let mentor = actor.mentor_id();
    let mut membership = event.membership.clone();
    membership.requesting.push(mentor.clone());
    Ok(plan(event, mentor, Transition::Request, membership))
}

/// Withdraw the acting mentor's open request.
///
/// # Errors
///
/// [`EngineError::NotEligible`]: `WrongRole`, `Locked` or `NotRequesting`.
pub fn plan_withdraw(event: &Event, actor: &Actor) -> Result<Plan, EngineError> {
    if actor.active_role() != Role::Mentor {
        return Err(Ineligibility::WrongRole.into());
    }
    if event.locked {
        return Err(Ineligibility::Locked.into());
    }
    let mentor = actor.mentor_id();
    if event.membership.column_of(&mentor) != Some(MembershipColumn::Requesting) {
        return Err(Ineligibility::NotRequesting.into());
    }
    let mut membership = event.membership.clone();
    membership.requesting.retain(|id| id != &mentor);
    Ok(plan(event, mentor, Transition::Withdraw, membership))
}

/// Move `mentor` from `requesting` to `accepted`.
///
/// # Errors
///
/// [`EngineError::PermissionDenied`] without `canAssignMentors`;
/// [`EngineError::NotEligible`] when locked, when the mentor has no open
/// request, or when the event is full and `enforce_capacity` is set.
pub fn plan_accept(
    event: &Event,
    actor: &Actor,
    mentor: &MentorId,
    enforce_capacity: bool,
) -> Result<Plan, EngineError> {
    check_decision(event, actor, mentor)?;
    if enforce_capacity && event.is_full() {
        return Err(Ineligibility::EventFull.into());
    }
    let mut membership = event.membership.clone();
    membership.requesting.retain(|id| id != mentor);
    membership.accepted.push(mentor.clone());
    Ok(plan(event, mentor.clone(), Transition::Accept, membership))
}

/// Move `mentor` from `requesting` to `declined`.
///
/// # Errors
///
/// [`EngineError::PermissionDenied`] without `canAssignMentors`;
/// [`EngineError::NotEligible`] when locked or when the mentor has no open
/// request.
pub fn plan_decline(event: &Event, actor: &Actor, mentor: &MentorId) -> Result<Plan, EngineError> {
    check_decision(event, actor, mentor)?;
    let mut membership = event.membership.clone();
    membership.requesting.retain(|id| id != mentor);
    membership.declined.push(mentor.clone());
    Ok(plan(event, mentor.clone(), Transition::Decline, membership))
}

fn check_decision(event: &Event, actor: &Actor, mentor: &MentorId) -> Result<(), EngineError> {
    actor.require(Capability::AssignMentors)?;
    if event.locked {
        return Err(Ineligibility::Locked.into());
    }
    match event.membership.column_of(mentor) {
        Some(MembershipColumn::Requesting) => Ok(()),
        Some(MembershipColumn::Accepted) => Err(Ineligibility::AlreadyAccepted.into()),
        Some(MembershipColumn::Declined) => Err(Ineligibility::AlreadyDeclined.into()),
        None => Err(Ineligibility::NotRequesting.into()),
    }
}

fn plan(event: &Event, mentor: MentorId, transition: Transition, membership: MembershipSets) -> Plan {
    Plan {
        event_id: event.id.clone(),
        mentor,
        transition,
        read_version: event.version,
        membership,
    }
}

/// Session-facing protocol: read, plan, commit.
#[derive(Debug)]
pub struct MentorRequestProtocol {
    writer: Arc<RowWriter>,
    config: ProtocolConfig,
}

impl MentorRequestProtocol {
    #[must_use]
    pub const fn new(writer: Arc<RowWriter>, config: ProtocolConfig) -> Self {
        Self { writer, config }
    }

    /// # Errors
    ///
    /// Eligibility, permission, read and write failures; see [`plan_request`].
    pub fn request(&self, actor: &Actor, event_id: &EventId) -> Result<Outcome, EngineError> {
        let event = self.writer.read(event_id)?;
        let now = self.writer.now();
        self.run(actor, plan_request(&event, actor, now))
    }

    /// # Errors
    ///
    /// See [`plan_withdraw`].
    pub fn withdraw(&self, actor: &Actor, event_id: &EventId) -> Result<Outcome, EngineError> {
        let event = self.writer.read(event_id)?;
        self.run(actor, plan_withdraw(&event, actor))
    }

    /// # Errors
    ///
    /// See [`plan_accept`].
    pub fn accept(
        &self,
        actor: &Actor,
        event_id: &EventId,
        mentor: &MentorId,
    ) -> Result<Outcome, EngineError> {
        actor.require(Capability::AssignMentors)?;
        let event = self.writer.read(event_id)?;
        self.run(
            actor,
            plan_accept(&event, actor, mentor, self.config.enforce_capacity),
        )
    }

    /// # Errors
    ///
    /// See [`plan_decline`].
    pub fn decline(
        &self,
        actor: &Actor,
        event_id: &EventId,
        mentor: &MentorId,
    ) -> Result<Outcome, EngineError> {
        actor.require(Capability::AssignMentors)?;
        let event = self.writer.read(event_id)?;
        self.run(actor, plan_decline(&event, actor, mentor))
    }

    /// Plan a decision against the given row without writing.
    ///
    /// # Errors
    ///
    /// See [`plan_accept`] and [`plan_decline`].
    pub fn plan(
        &self,
        actor: &Actor,
        event: &Event,
        transition: Transition,
        mentor: &MentorId,
    ) -> Result<Plan, EngineError> {
        match transition {
            Transition::Request => plan_request(event, actor, self.writer.now()),
            Transition::Withdraw => plan_withdraw(event, actor),
            Transition::Accept => plan_accept(event, actor, mentor, self.config.enforce_capacity),
            Transition::Decline => plan_decline(event, actor, mentor),
        }
    }

    /// Write a previously computed plan.
    ///
    /// # Errors
    ///
    /// See [`RowWriter::commit`].
    pub fn commit(&self, plan: &Plan) -> Result<Outcome, EngineError> {
        let patch = EventPatch::at(self.writer.now()).with_membership(plan.membership.clone());
        let event = self.writer.commit(&plan.event_id, &patch, plan.read_version)?;
        let status = derive_status(&event);
        tracing::info!(
            event = %event.id,
            mentor = %plan.mentor,
            transition = %plan.transition,
            %status,
            version = event.version,
            "mentor request transition"
        );
        Ok(Outcome { event, status })
    }

    #[must_use]
    pub const fn config(&self) -> ProtocolConfig {
        self.config
    }

    fn run(&self, actor: &Actor, plan: Result<Plan, EngineError>) -> Result<Outcome, EngineError> {
        let result = plan.and_then(|plan| self.commit(&plan));
        if let Err(err) = &result {
            tracing::debug!(actor = %actor.id(), role = %actor.active_role(), %err, "protocol call rejected");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::event::fixtures::{at, mentors, sample_event};
    use crate::persist::memory::MemoryRepository;

    struct Rig {
        repo: Arc<MemoryRepository>,
        store: Arc<EventStore>,
        protocol: MentorRequestProtocol,
    }

    fn rig_with(write_mode: WriteMode, sync: SyncStrategy, event: &Event) -> Rig {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(event).expect("insert");
        let store = Arc::new(EventStore::new(repo.clone()));
        store.load().expect("load");
        let clock = Arc::new(FixedClock::new(at((2031, 5, 1), (12, 0))));
        let writer = Arc::new(RowWriter::new(repo.clone(), store.clone(), clock, write_mode, sync));
        let protocol = MentorRequestProtocol::new(writer, ProtocolConfig::default());
        Rig {
            repo,
            store,
            protocol,
        }
    }

    fn rig() -> Rig {
        rig_with(WriteMode::Conditional, SyncStrategy::Patch, &sample_event())
    }

    fn mentor(id: &str) -> Actor {
        Actor::new(id, vec![Role::Mentor]).expect("actor")
    }

    fn staff() -> Actor {
        Actor::new("s-ada", vec![Role::Staff]).expect("actor")
    }

    fn id() -> EventId {
        "ev-sample".into()
    }

    #[test]
    fn request_accept_fills_the_event() {
        let rig = rig();
        let outcome = rig.protocol.request(&mentor("m1"), &id()).expect("request");
        assert_eq!(outcome.status, Status::FirstRequests);
        rig.protocol.request(&mentor("m2"), &id()).expect("request");

        let partly = rig.protocol.accept(&staff(), &id(), &"m1".into()).expect("accept");
        assert_eq!(partly.status, Status::SuccessPartly);
        let complete = rig.protocol.accept(&staff(), &id(), &"m2".into()).expect("accept");
        assert_eq!(complete.status, Status::SuccessComplete);
        assert_eq!(complete.event.membership.accepted, mentors(&["m1", "m2"]));
        assert!(complete.event.membership.requesting.is_empty());

        let cached = rig.store.get_by_id(&id()).expect("cached");
        assert_eq!(cached, complete.event);
    }

    #[test]
    fn double_request_is_rejected() {
        let rig = rig();
        rig.protocol.request(&mentor("m1"), &id()).expect("request");
        let err = rig.protocol.request(&mentor("m1"), &id()).expect_err("second request");
        assert!(matches!(err, EngineError::NotEligible(Ineligibility::AlreadyRequested)));
        assert_eq!(err.user_message(), "You have already requested this event");
    }

    #[test]
    fn event_without_allowlist_accepts_requests() {
        let mut event = sample_event();
        event.initial_selected_mentors.clear();
        let rig = rig_with(WriteMode::Conditional, SyncStrategy::Patch, &event);

        let outcome = rig.protocol.request(&mentor("m7"), &id()).expect("request");
        assert_eq!(outcome.status, Status::FirstRequests);
        assert_eq!(outcome.event.membership.requesting, mentors(&["m7"]));
    }

    #[test]
    fn withdraw_returns_to_none() {
        let rig = rig();
        rig.protocol.request(&mentor("m1"), &id()).expect("request");
        let outcome = rig.protocol.withdraw(&mentor("m1"), &id()).expect("withdraw");
        assert!(outcome.event.membership.is_empty());
        assert_eq!(outcome.status, Status::New);

        assert!(matches!(
            rig.protocol.withdraw(&mentor("m1"), &id()),
            Err(EngineError::NotEligible(Ineligibility::NotRequesting))
        ));
    }

    #[test]
    fn decided_mentors_cannot_go_back() {
        let rig = rig();
        rig.protocol.request(&mentor("m1"), &id()).expect("request");
        rig.protocol.decline(&staff(), &id(), &"m1".into()).expect("decline");

        assert!(matches!(
            rig.protocol.request(&mentor("m1"), &id()),
            Err(EngineError::NotEligible(Ineligibility::AlreadyDeclined))
        ));
        assert!(matches!(
            rig.protocol.accept(&staff(), &id(), &"m1".into()),
            Err(EngineError::NotEligible(Ineligibility::AlreadyDeclined))
        ));
        assert!(matches!(
            rig.protocol.withdraw(&mentor("m1"), &id()),
            Err(EngineError::NotEligible(Ineligibility::NotRequesting))
        ));
    }

    #[test]
    fn mentors_cannot_decide() {
        let rig = rig();
        rig.protocol.request(&mentor("m1"), &id()).expect("request");
        let err = rig
            .protocol
            .accept(&mentor("m2"), &id(), &"m1".into())
            .expect_err("mentor cannot accept");
        assert!(matches!(
            err,
            EngineError::PermissionDenied {
                capability: Capability::AssignMentors,
                ..
            }
        ));
    }

    #[test]
    fn capacity_is_enforced_on_accept() {
        let mut event = sample_event();
        event.required_mentor_count = 1;
        event.membership.requesting = mentors(&["m1", "m2"]);
        let rig = rig_with(WriteMode::Conditional, SyncStrategy::Patch, &event);

        rig.protocol.accept(&staff(), &id(), &"m1".into()).expect("first accept");
        assert!(matches!(
            rig.protocol.accept(&staff(), &id(), &"m2".into()),
            Err(EngineError::NotEligible(Ineligibility::EventFull))
        ));
        rig.protocol.decline(&staff(), &id(), &"m2".into()).expect("decline still allowed");
    }

    #[test]
    fn capacity_check_can_be_disabled() {
        let mut event = sample_event();
        event.required_mentor_count = 1;
        event.membership.accepted = mentors(&["m1"]);
        event.membership.requesting = mentors(&["m2"]);
        let plan = plan_accept(&event, &staff(), &"m2".into(), false).expect("overbook");
        assert_eq!(plan.membership.accepted, mentors(&["m1", "m2"]));
    }

    #[test]
    fn locked_events_reject_every_transition() {
        let mut event = sample_event();
        event.locked = true;
        event.membership.requesting = mentors(&["m1"]);
        let rig = rig_with(WriteMode::Conditional, SyncStrategy::Patch, &event);

        for result in [
            rig.protocol.request(&mentor("m2"), &id()),
            rig.protocol.withdraw(&mentor("m1"), &id()),
            rig.protocol.accept(&staff(), &id(), &"m1".into()),
            rig.protocol.decline(&staff(), &id(), &"m1".into()),
        ] {
            assert!(matches!(
                result,
                Err(EngineError::NotEligible(Ineligibility::Locked))
            ));
        }
    }

    #[test]
    fn stale_plan_is_rejected_in_conditional_mode() {
        let rig = rig();
        rig.protocol.request(&mentor("m1"), &id()).expect("request");
        rig.protocol.request(&mentor("m2"), &id()).expect("request");

        let row = rig.repo.select_one(&id()).expect("read").expect("row");
        let first = rig.protocol.plan(&staff(), &row, Transition::Accept, &"m1".into()).expect("plan");
        let second = rig.protocol.plan(&staff(), &row, Transition::Accept, &"m2".into()).expect("plan");

        rig.protocol.commit(&first).expect("first commit");
        let before = rig.store.get_by_id(&id()).expect("cached");
        let err = rig.protocol.commit(&second).expect_err("stale");
        assert!(matches!(err, EngineError::StaleRead { expected: 3, found: 4, .. }));
        assert_eq!(rig.store.get_by_id(&id()).expect("cached"), before);
    }

    #[test]
    fn last_write_wins_loses_the_first_accept() {
        let mut event = sample_event();
        event.membership.requesting = mentors(&["m1", "m2"]);
        let rig = rig_with(WriteMode::LastWriteWins, SyncStrategy::Refetch, &event);

        let row = rig.repo.select_one(&id()).expect("read").expect("row");
        let first = rig.protocol.plan(&staff(), &row, Transition::Accept, &"m1".into()).expect("plan");
        let second = rig.protocol.plan(&staff(), &row, Transition::Accept, &"m2".into()).expect("plan");
        rig.protocol.commit(&first).expect("first");
        let outcome = rig.protocol.commit(&second).expect("second overwrites");

        assert_eq!(outcome.event.membership.accepted, mentors(&["m2"]));
        assert_eq!(outcome.event.membership.requesting, mentors(&["m1"]));
        assert_eq!(rig.repo.full_reads(), 3, "refetch strategy reloads after each write");
    }

    #[test]
    fn failed_write_leaves_cache_untouched() {
        let rig = rig();
        let before = rig.store.snapshot().expect("loaded");
        rig.repo.fail_next_writes(1);

        let err = rig.protocol.request(&mentor("m1"), &id()).expect_err("write fails");
        assert!(matches!(err, EngineError::RemoteWriteFailure(_)));
        assert_eq!(err.user_message(), "Something went wrong. Please try again");
        let after = rig.store.snapshot().expect("loaded");
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn unknown_event_is_reported() {
        let rig = rig();
        assert!(matches!(
            rig.protocol.request(&mentor("m1"), &"ev-missing".into()),
            Err(EngineError::EventNotFound(_))
        ));
    }
}
