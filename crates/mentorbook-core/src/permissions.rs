//! Capability evaluation for the active role of an actor.
//!
//! Roles map to a fixed [`Capabilities`] table; nothing here is
//! event-specific except the derived predicates ([`can_request_mentor`],
//! [`can_mentor_view_event`], [`can_edit_event`], [`can_delete_event`]).
//!
//! # Role switching
//!
//! An actor may activate any role they hold. An actor whose original role is
//! `super-admin` may activate every role regardless of membership; this is an
//! explicit escalation rule in [`Actor::can_activate`].

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

use crate::error::{EngineError, Ineligibility};
use crate::model::{Event, MembershipColumn, MentorId, Role, StaffId};

/// Named permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    CreateEvents,
    EditEvents,
    DeleteEvents,
    EditPastEvents,
    DeletePastEvents,
    ProcessMentorRequests,
    AssignMentors,
    LockEvents,
    ManageProducts,
    ManageTraits,
    ManageAccounts,
    RequestMentor,
    ViewAllEvents,
}

impl Capability {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateEvents => "canCreateEvents",
            Self::EditEvents => "canEditEvents",
            Self::DeleteEvents => "canDeleteEvents",
            Self::EditPastEvents => "canEditPastEvents",
            Self::DeletePastEvents => "canDeletePastEvents",
            Self::ProcessMentorRequests => "canProcessMentorRequests",
            Self::AssignMentors => "canAssignMentors",
            Self::LockEvents => "canLockEvents",
            Self::ManageProducts => "canManageProducts",
            Self::ManageTraits => "canManageTraits",
            Self::ManageAccounts => "canManageAccounts",
            Self::RequestMentor => "canRequestMentor",
            Self::ViewAllEvents => "canViewAllEvents",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set granted by one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub can_create_events: bool,
    pub can_edit_events: bool,
    pub can_delete_events: bool,
    pub can_edit_past_events: bool,
    pub can_delete_past_events: bool,
    pub can_process_mentor_requests: bool,
    pub can_assign_mentors: bool,
    pub can_lock_events: bool,
    pub can_manage_products: bool,
    pub can_manage_traits: bool,
    pub can_manage_accounts: bool,
    pub can_request_mentor: bool,
    pub can_view_all_events: bool,
}

impl Capabilities {
    #[must_use]
    pub const fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::CreateEvents => self.can_create_events,
            Capability::EditEvents => self.can_edit_events,
            Capability::DeleteEvents => self.can_delete_events,
            Capability::EditPastEvents => self.can_edit_past_events,
            Capability::DeletePastEvents => self.can_delete_past_events,
            Capability::ProcessMentorRequests => self.can_process_mentor_requests,
            Capability::AssignMentors => self.can_assign_mentors,
            Capability::LockEvents => self.can_lock_events,
            Capability::ManageProducts => self.can_manage_products,
            Capability::ManageTraits => self.can_manage_traits,
            Capability::ManageAccounts => self.can_manage_accounts,
            Capability::RequestMentor => self.can_request_mentor,
            Capability::ViewAllEvents => self.can_view_all_events,
        }
    }
}

const NONE: Capabilities = Capabilities {
    can_create_events: false,
    can_edit_events: false,
    can_delete_events: false,
    can_edit_past_events: false,
    can_delete_past_events: false,
    can_process_mentor_requests: false,
    can_assign_mentors: false,
    can_lock_events: false,
    can_manage_products: false,
    can_manage_traits: false,
    can_manage_accounts: false,
    can_request_mentor: false,
    can_view_all_events: false,
};

const STAFF: Capabilities = Capabilities {
    can_create_events: true,
    can_edit_events: true,
    can_delete_events: true,
    can_process_mentor_requests: true,
    can_assign_mentors: true,
    can_lock_events: true,
    can_view_all_events: true,
    ..NONE
};

const MENTORING_MANAGEMENT: Capabilities = Capabilities {
    can_edit_past_events: true,
    can_delete_past_events: true,
    can_manage_products: true,
    can_manage_traits: true,
    ..STAFF
};

/// Capability table for `role`.
#[must_use]
pub const fn capabilities_for(role: Role) -> Capabilities {
    match role {
        Role::Mentor => Capabilities {
            can_request_mentor: true,
            ..NONE
        },
        Role::Staff => STAFF,
        Role::MentoringManagement => MENTORING_MANAGEMENT,
        Role::SuperAdmin => Capabilities {
            can_manage_accounts: true,
            ..MENTORING_MANAGEMENT
        },
    }
}

/// The acting identity of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    id: String,
    held_roles: Vec<Role>,
    original_role: Role,
    active_role: Role,
}

impl Actor {
    /// Build an actor signed in with their highest-precedence held role.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoRoles`] when `held_roles` is empty.
    pub fn new(id: impl Into<String>, held_roles: Vec<Role>) -> Result<Self, EngineError> {
        let original_role = Role::highest(&held_roles).ok_or(EngineError::NoRoles)?;
        let mut held_roles = held_roles;
        held_roles.sort_unstable();
        held_roles.dedup();
        Ok(Self {
            id: id.into(),
            held_roles,
            original_role,
            active_role: original_role,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn mentor_id(&self) -> MentorId {
        MentorId::new(self.id.clone())
    }

    #[must_use]
    pub fn staff_id(&self) -> StaffId {
        StaffId::new(self.id.clone())
    }

    #[must_use]
    pub fn held_roles(&self) -> &[Role] {
        &self.held_roles
    }

    #[must_use]
    pub const fn original_role(&self) -> Role {
        self.original_role
    }

    #[must_use]
    pub const fn active_role(&self) -> Role {
        self.active_role
    }

    #[must_use]
    pub fn holds(&self, role: Role) -> bool {
        self.held_roles.contains(&role)
    }

    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        capabilities_for(self.active_role)
    }

    /// `held_roles.contains(role) || original_role == SuperAdmin`.
    #[must_use]
    pub fn can_activate(&self, role: Role) -> bool {
        self.holds(role) || self.original_role == Role::SuperAdmin
    }

    /// Make `role` the active role.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RoleNotHeld`] when the actor may not activate
    /// `role`.
    pub fn switch_role(&mut self, role: Role) -> Result<(), EngineError> {
        if !self.can_activate(role) {
            return Err(EngineError::RoleNotHeld {
                role,
                active: self.active_role,
            });
        }
        tracing::info!(actor = %self.id, from = %self.active_role, to = %role, "switched active role");
        self.active_role = role;
        Ok(())
    }

    /// Fail with [`EngineError::PermissionDenied`] unless the active role
    /// grants `capability`.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn require(&self, capability: Capability) -> Result<(), EngineError> {
        if self.capabilities().allows(capability) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied {
                capability,
                role: self.active_role,
            })
        }
    }
}

/// First failed request precondition for `actor` on `event`, if any.
///
/// Checks, in order: active role is `mentor`, not already in a membership
/// set, not started, capacity left. Allowlist visibility and the lock flag
/// are not part of the gate.
#[must_use]
pub fn request_ineligibility(
    event: &Event,
    actor: &Actor,
    now: NaiveDateTime,
) -> Option<Ineligibility> {
    if actor.active_role() != Role::Mentor {
        return Some(Ineligibility::WrongRole);
    }
    if let Some(column) = event.membership.column_of(&actor.mentor_id()) {
        return Some(match column {
            MembershipColumn::Requesting => Ineligibility::AlreadyRequested,
            MembershipColumn::Accepted => Ineligibility::AlreadyAccepted,
            MembershipColumn::Declined => Ineligibility::AlreadyDeclined,
        });
    }
    if event.is_past(now) {
        return Some(Ineligibility::EventPast);
    }
    if event.is_full() {
        return Some(Ineligibility::EventFull);
    }
    None
}

/// Whether `actor` may request to join `event` at `now`.
#[must_use]
pub fn can_request_mentor(event: &Event, actor: &Actor, now: NaiveDateTime) -> bool {
    request_ineligibility(event, actor, now).is_none()
}

/// [`request_ineligibility`] as a `Result`.
///
/// # Errors
///
/// Returns [`EngineError::NotEligible`] with the first failed precondition.
pub fn check_request_eligibility(
    event: &Event,
    actor: &Actor,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    request_ineligibility(event, actor, now).map_or(Ok(()), |reason| Err(reason.into()))
}

/// Mentor visibility: non-mentor roles see everything, mentors only events
/// whose creation-time allowlist names them.
#[must_use]
pub fn can_mentor_view_event(event: &Event, actor: &Actor) -> bool {
    if actor.active_role() != Role::Mentor {
        return true;
    }
    event.initial_selected_mentors.contains(&actor.mentor_id())
}

/// Capability needed to edit `event` at `now`.
#[must_use]
pub fn edit_capability(event: &Event, now: NaiveDateTime) -> Capability {
    if event.is_past(now) {
        Capability::EditPastEvents
    } else {
        Capability::EditEvents
    }
}

/// Capability needed to delete `event` at `now`.
#[must_use]
pub fn delete_capability(event: &Event, now: NaiveDateTime) -> Capability {
    if event.is_past(now) {
        Capability::DeletePastEvents
    } else {
        Capability::DeleteEvents
    }
}

#[must_use]
pub fn can_edit_event(event: &Event, actor: &Actor, now: NaiveDateTime) -> bool {
    actor.capabilities().allows(edit_capability(event, now))
}

#[must_use]
pub fn can_delete_event(event: &Event, actor: &Actor, now: NaiveDateTime) -> bool {
    actor.capabilities().allows(delete_capability(event, now))
}

/// Events `actor` is allowed to see, in input order.
pub fn visible_events<'a>(
    events: &'a [Event],
    actor: &'a Actor,
) -> impl Iterator<Item = &'a Event> + 'a {
    events
        .iter()
        .filter(move |event| can_mentor_view_event(event, actor))
}
