//! One actor's session against the shared event collection.
//!
//! Starting a session decodes nothing itself: it takes already decoded
//! [`IdentityClaims`], builds the [`Actor`], loads the [`EventStore`], and
//! subscribes a [`RealtimeInvalidator`] when the actor can act as a mentor.
//! [`Session::end`] tears all of that down.

use std::sync::Arc;

use crate::catalog::ProductCatalog;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::identity::IdentityClaims;
use crate::lifecycle::EventLifecycle;
use crate::model::{Event, EventDraft, EventId, MentorId, Role};
use crate::permissions::Actor;
use crate::persist::EventRepository;
use crate::protocol::{MentorRequestProtocol, Outcome, RowWriter};
use crate::push::PushChannel;
use crate::realtime::RealtimeInvalidator;
use crate::store::EventStore;

/// External collaborators shared by every session of a process.
#[derive(Clone)]
pub struct Collaborators {
    pub repo: Arc<dyn EventRepository>,
    pub push: Arc<dyn PushChannel>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Session {
    actor: Actor,
    display_name: Option<String>,
    store: Arc<EventStore>,
    invalidator: Option<RealtimeInvalidator>,
    protocol: MentorRequestProtocol,
    lifecycle: EventLifecycle,
    ended: bool,
}

impl Session {
    /// # Errors
    ///
    /// [`EngineError::NoRoles`] when the claims name no known role, or
    /// [`EngineError::RemoteReadFailure`] when the initial load fails.
    pub fn start(
        claims: &IdentityClaims,
        collaborators: &Collaborators,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let actor = claims.to_actor()?;
        let store = Arc::new(EventStore::new(Arc::clone(&collaborators.repo)));
        store.load()?;

        // Super-admins can escalate to mentor at any time.
        let invalidator = actor.can_activate(Role::Mentor).then(|| {
            RealtimeInvalidator::start(Arc::clone(&collaborators.push), &store, actor.mentor_id())
        });

        let writer = Arc::new(RowWriter::new(
            Arc::clone(&collaborators.repo),
            Arc::clone(&store),
            Arc::clone(&collaborators.clock),
            config.protocol.write_mode,
            config.sync.strategy,
        ));
        let protocol = MentorRequestProtocol::new(Arc::clone(&writer), config.protocol);
        let lifecycle =
            EventLifecycle::new(writer, Arc::clone(&collaborators.catalog), config.defaults);

        tracing::info!(
            actor = %actor.id(),
            role = %actor.active_role(),
            realtime = invalidator.is_some(),
            write_mode = %config.protocol.write_mode,
            "session started"
        );
        Ok(Self {
            actor,
            display_name: claims.display_name.clone(),
            store,
            invalidator,
            protocol,
            lifecycle,
            ended: false,
        })
    }

    #[must_use]
    pub const fn actor(&self) -> &Actor {
        &self.actor
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    #[must_use]
    pub const fn protocol(&self) -> &MentorRequestProtocol {
        &self.protocol
    }

    #[must_use]
    pub const fn lifecycle(&self) -> &EventLifecycle {
        &self.lifecycle
    }

    #[must_use]
    pub const fn invalidator(&self) -> Option<&RealtimeInvalidator> {
        self.invalidator.as_ref()
    }

    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// # Errors
    ///
    /// [`EngineError::RoleNotHeld`] when the role may not be activated.
    pub fn switch_role(&mut self, role: Role) -> Result<(), EngineError> {
        self.live()?;
        self.actor.switch_role(role)
    }

    /// Cached events visible to the active role.
    ///
    /// # Errors
    ///
    /// [`EngineError::SessionEnded`].
    pub fn visible_events(&self) -> Result<Vec<Event>, EngineError> {
        self.live()?;
        Ok(self.store.visible_to(&self.actor))
    }

    /// # Errors
    ///
    /// See [`MentorRequestProtocol::request`].
    pub fn request(&self, event_id: &EventId) -> Result<Outcome, EngineError> {
        self.live()?;
        self.protocol.request(&self.actor, event_id)
    }

    /// # Errors
    ///
    /// See [`MentorRequestProtocol::withdraw`].
    pub fn withdraw(&self, event_id: &EventId) -> Result<Outcome, EngineError> {
        self.live()?;
        self.protocol.withdraw(&self.actor, event_id)
    }

    /// # Errors
    ///
    /// See [`MentorRequestProtocol::accept`].
    pub fn accept(&self, event_id: &EventId, mentor: &MentorId) -> Result<Outcome, EngineError> {
        self.live()?;
        self.protocol.accept(&self.actor, event_id, mentor)
    }

    /// # Errors
    ///
    /// See [`MentorRequestProtocol::decline`].
    pub fn decline(&self, event_id: &EventId, mentor: &MentorId) -> Result<Outcome, EngineError> {
        self.live()?;
        self.protocol.decline(&self.actor, event_id, mentor)
    }

    /// # Errors
    ///
    /// See [`EventLifecycle::create_event`].
    pub fn create_event(&self, draft: EventDraft) -> Result<Outcome, EngineError> {
        self.live()?;
        self.lifecycle.create_event(&self.actor, draft)
    }

    /// # Errors
    ///
    /// See [`EventLifecycle::lock`].
    pub fn lock(&self, event_id: &EventId) -> Result<Outcome, EngineError> {
        self.live()?;
        self.lifecycle.lock(&self.actor, event_id)
    }

    /// # Errors
    ///
    /// See [`EventLifecycle::unlock`].
    pub fn unlock(&self, event_id: &EventId) -> Result<Outcome, EngineError> {
        self.live()?;
        self.lifecycle.unlock(&self.actor, event_id)
    }

    /// # Errors
    ///
    /// See [`EventLifecycle::delete_event`].
    pub fn delete_event(&self, event_id: &EventId) -> Result<(), EngineError> {
        self.live()?;
        self.lifecycle.delete_event(&self.actor, event_id)
    }

    /// Stop push invalidation and drop the cache. Idempotent.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        if let Some(invalidator) = self.invalidator.take() {
            invalidator.stop();
        }
        self.store.teardown();
        self.ended = true;
        tracing::info!(actor = %self.actor.id(), "session ended");
    }

    const fn live(&self) -> Result<(), EngineError> {
        if self.ended {
            Err(EngineError::SessionEnded)
        } else {
            Ok(())
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end();
    }
}
