use mentorbook_core::protocol::{Outcome, Plan, Transition};
use mentorbook_core::session::Session;
use mentorbook_core::{EngineError, Event, EventId, MentorId};
use serde::Serialize;

use crate::rng::DeterministicRng;

/// Stable identifier for a simulated agent.
pub type AgentId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Mentor,
    Staff,
}

/// One simulated actor: a live session plus at most one planned but
/// uncommitted transition.
///
/// Plans are computed from the agent's own cached snapshot, so a plan can
/// sit on a row version other agents have already replaced.
#[derive(Debug)]
pub struct SimulatedAgent {
    id: AgentId,
    kind: AgentKind,
    session: Session,
    pending: Option<Plan>,
}

impl SimulatedAgent {
    #[must_use]
    pub const fn new(id: AgentId, kind: AgentKind, session: Session) -> Self {
        Self {
            id,
            kind,
            session,
            pending: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> AgentId {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> AgentKind {
        self.kind
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&Plan> {
        self.pending.as_ref()
    }

    /// Pick the next transition this agent would attempt.
    pub fn choose(&self, rng: &mut DeterministicRng, mentors: &[MentorId]) -> (Transition, MentorId) {
        match self.kind {
            AgentKind::Mentor => {
                let transition = if rng.hit_rate_percent(70) {
                    Transition::Request
                } else {
                    Transition::Withdraw
                };
                (transition, self.session.actor().mentor_id())
            }
            AgentKind::Staff => {
                let transition = if rng.hit_rate_percent(70) {
                    Transition::Accept
                } else {
                    Transition::Decline
                };
                let mentor = rng
                    .pick(mentors)
                    .cloned()
                    .unwrap_or_else(|| self.session.actor().mentor_id());
                (transition, mentor)
            }
        }
    }

    /// Plan against the cached row and hold the plan until [`Self::commit`].
    /// A rejected plan reloads the snapshot, like a user refreshing the page.
    ///
    /// # Errors
    ///
    /// Eligibility and read errors from planning. Nothing is held on error.
    pub fn plan(
        &mut self,
        event_id: &EventId,
        transition: Transition,
        mentor: &MentorId,
    ) -> Result<&Plan, EngineError> {
        let row = self.cached_row(event_id)?;
        match self
            .session
            .protocol()
            .plan(self.session.actor(), &row, transition, mentor)
        {
            Ok(plan) => Ok(self.pending.insert(plan)),
            Err(err) => {
                self.refresh();
                Err(err)
            }
        }
    }

    fn cached_row(&self, event_id: &EventId) -> Result<Event, EngineError> {
        if let Some(row) = self.session.store().get_by_id(event_id) {
            return Ok(row);
        }
        self.session
            .store()
            .refetch()?
            .get(event_id)
            .cloned()
            .ok_or_else(|| EngineError::EventNotFound(event_id.clone()))
    }

    /// Write the held plan, if any. A stale read refreshes the snapshot so
    /// the next plan starts from the current row.
    pub fn commit(&mut self) -> Option<(Plan, Result<Outcome, EngineError>)> {
        let plan = self.pending.take()?;
        let result = self.session.protocol().commit(&plan);
        if matches!(result, Err(EngineError::StaleRead { .. })) {
            self.refresh();
        }
        Some((plan, result))
    }

    fn refresh(&self) {
        if let Err(err) = self.session.store().refetch() {
            tracing::warn!(agent = self.id, error = %err, "snapshot refetch failed");
        }
    }
}
