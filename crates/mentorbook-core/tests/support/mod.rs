//! Shared fixtures for mentorbook-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mentorbook_core::catalog::MemoryCatalog;
use mentorbook_core::clock::FixedClock;
use mentorbook_core::config::EngineConfig;
use mentorbook_core::identity::IdentityClaims;
use mentorbook_core::model::{EventDraft, Schedule};
use mentorbook_core::persist::EventRepository;
use mentorbook_core::persist::memory::MemoryRepository;
use mentorbook_core::push::PushHub;
use mentorbook_core::session::{Collaborators, Session};
use mentorbook_core::EventId;

pub fn at(date: (i32, u32, u32), time: (u32, u32)) -> NaiveDateTime {
    NaiveDateTime::new(
        NaiveDate::from_ymd_opt(date.0, date.1, date.2).expect("valid date"),
        NaiveTime::from_hms_opt(time.0, time.1, 0).expect("valid time"),
    )
}

/// "Now" for every test world: well before the seeded events.
pub fn now() -> NaiveDateTime {
    at((2031, 5, 1), (12, 0))
}

pub struct World {
    pub hub: Arc<PushHub>,
    pub repo: Arc<dyn EventRepository>,
    pub memory: Option<Arc<MemoryRepository>>,
    pub clock: Arc<FixedClock>,
    pub collaborators: Collaborators,
    pub config: EngineConfig,
}

impl World {
    pub fn memory(config: EngineConfig) -> Self {
        let hub = Arc::new(PushHub::new());
        let memory = Arc::new(MemoryRepository::with_publisher(hub.clone()));
        Self::with_repo(hub, memory.clone(), Some(memory), config)
    }

    pub fn with_repo(
        hub: Arc<PushHub>,
        repo: Arc<dyn EventRepository>,
        memory: Option<Arc<MemoryRepository>>,
        config: EngineConfig,
    ) -> Self {
        let clock = Arc::new(FixedClock::new(now()));
        let collaborators = Collaborators {
            repo: repo.clone(),
            push: hub.clone(),
            catalog: Arc::new(MemoryCatalog::new()),
            clock: clock.clone(),
        };
        Self {
            hub,
            repo,
            memory,
            clock,
            collaborators,
            config,
        }
    }

    pub fn session(&self, subject: &str, roles: &[&str]) -> Session {
        Session::start(
            &IdentityClaims::new(subject, roles.iter().copied()),
            &self.collaborators,
            &self.config,
        )
        .expect("session starts")
    }

    /// Staff session creating a two-mentor event open to `mentors`.
    pub fn seed_event(&self, mentors: &[&str]) -> EventId {
        let staff = self.session("s-ada", &["staff"]);
        let start = at((2031, 5, 20), (10, 0));
        let mut draft = EventDraft::new("Career day", Schedule::new(start.date(), start.time(), 90));
        draft.required_mentor_count = Some(2);
        draft.initial_selected_mentors = mentors.iter().map(|id| (*id).into()).collect();
        staff.create_event(draft).expect("create event").event.id
    }
}
