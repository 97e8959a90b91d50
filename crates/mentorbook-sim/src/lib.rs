//! Deterministic simulation of concurrent mentor request traffic.
//!
//! Mentor and staff sessions share one in-memory repository and push hub.
//! Each round the seeded scheduler picks one agent, which either plans a
//! transition against its own cached snapshot or commits the plan it holds.
//! Plans held across rounds interleave reads and writes between sessions:
//! conditional writes turn that into stale reads, last-write-wins turns it
//! into lost updates. [`oracle`] checks the recorded trace afterwards.

pub mod agent;
pub mod campaign;
pub mod oracle;
pub mod rng;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use mentorbook_core::catalog::MemoryCatalog;
use mentorbook_core::clock::FixedClock;
use mentorbook_core::config::{EngineConfig, SyncStrategy, WriteMode};
use mentorbook_core::identity::IdentityClaims;
use mentorbook_core::model::{EventDraft, MembershipSets, Schedule};
use mentorbook_core::persist::EventRepository;
use mentorbook_core::persist::memory::MemoryRepository;
use mentorbook_core::protocol::Transition;
use mentorbook_core::push::PushHub;
use mentorbook_core::session::{Collaborators, Session};
use mentorbook_core::{EngineError, Event, EventId, MentorId};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentKind, SimulatedAgent};
use crate::rng::DeterministicRng;

/// Parameters of one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub mentor_count: usize,
    pub staff_count: usize,
    pub rounds: u64,
    /// Capacity of the simulated event.
    pub required_mentor_count: u32,
    /// Chance that an agent holding a plan commits it when scheduled.
    pub commit_percent: u8,
    pub write_mode: WriteMode,
    pub enforce_capacity: bool,
    pub sync: SyncStrategy,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            mentor_count: 5,
            staff_count: 2,
            rounds: 48,
            required_mentor_count: 2,
            commit_percent: 50,
            write_mode: WriteMode::Conditional,
            enforce_capacity: true,
            sync: SyncStrategy::Patch,
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.mentor_count == 0 {
            bail!("mentor_count must be > 0");
        }
        if self.staff_count == 0 {
            bail!("staff_count must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.required_mentor_count == 0 {
            bail!("required_mentor_count must be > 0");
        }
        if self.commit_percent == 0 {
            bail!("commit_percent must be > 0 or no plan is ever written");
        }
        Ok(())
    }

    fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::default();
        engine.protocol.write_mode = self.write_mode;
        engine.protocol.enforce_capacity = self.enforce_capacity;
        engine.sync.strategy = self.sync;
        engine
    }
}

/// What happened in a single scheduled step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceKind {
    Planned {
        transition: Transition,
        mentor: MentorId,
        read_version: u64,
    },
    Rejected {
        transition: Transition,
        mentor: MentorId,
        code: String,
    },
    Committed {
        transition: Transition,
        mentor: MentorId,
        read_version: u64,
        version: u64,
        membership: MembershipSets,
    },
    Stale {
        transition: Transition,
        mentor: MentorId,
        read_version: u64,
        found: u64,
    },
    Failed {
        transition: Transition,
        mentor: MentorId,
        code: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub round: u64,
    pub agent: AgentId,
    #[serde(flatten)]
    pub kind: TraceKind,
}

/// A mentor session's cached copy of the event at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MentorCache {
    pub mentor: MentorId,
    pub cached: Option<Event>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationResult {
    pub config: SimulationConfig,
    pub trace: Vec<TraceEntry>,
    pub initial_membership: MembershipSets,
    pub final_event: Event,
    pub mentor_caches: Vec<MentorCache>,
}

impl SimulationResult {
    /// Successful writes in commit order.
    #[must_use = "iterators are lazy"]
    pub fn commits(&self) -> impl Iterator<Item = (&TraceEntry, &MembershipSets)> {
        self.trace.iter().filter_map(|entry| match &entry.kind {
            TraceKind::Committed { membership, .. } => Some((entry, membership)),
            _ => None,
        })
    }

    #[must_use]
    pub fn stale_reads(&self) -> usize {
        self.trace
            .iter()
            .filter(|entry| matches!(entry.kind, TraceKind::Stale { .. }))
            .count()
    }

    /// True when some write raced another session: either it was refused as
    /// stale or it overwrote a row newer than the one it was planned on.
    #[must_use]
    pub fn interesting_state_reached(&self) -> bool {
        self.stale_reads() > 0
            || self.trace.iter().any(|entry| {
                matches!(
                    entry.kind,
                    TraceKind::Committed { read_version, version, .. } if version > read_version + 1
                )
            })
    }
}

/// Drives concurrent sessions over one shared event.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    repo: Arc<MemoryRepository>,
    clock: Arc<FixedClock>,
    agents: Vec<SimulatedAgent>,
    mentors: Vec<MentorId>,
    event_id: EventId,
    initial_membership: MembershipSets,
    trace: Vec<TraceEntry>,
}

fn start_of_run() -> Result<NaiveDateTime> {
    let date = NaiveDate::from_ymd_opt(2031, 5, 1).context("valid start date")?;
    let time = NaiveTime::from_hms_opt(9, 0, 0).context("valid start time")?;
    Ok(NaiveDateTime::new(date, time))
}

impl Simulator {
    /// Build the shared world, seed one event allowing every simulated
    /// mentor, and start one session per agent.
    ///
    /// # Errors
    ///
    /// Returns an error when the config is invalid or the world cannot be set up.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let start = start_of_run()?;
        let hub = Arc::new(PushHub::new());
        let repo = Arc::new(MemoryRepository::with_publisher(hub.clone()));
        let clock = Arc::new(FixedClock::new(start));
        let collaborators = Collaborators {
            repo: repo.clone(),
            push: hub,
            catalog: Arc::new(MemoryCatalog::new()),
            clock: clock.clone(),
        };
        let engine = config.engine_config();
        let open = |subject: &str, role: &str| -> Result<Session> {
            Session::start(&IdentityClaims::new(subject, [role]), &collaborators, &engine)
                .with_context(|| format!("start session for {subject}"))
        };

        let mentors: Vec<MentorId> = (0..config.mentor_count)
            .map(|i| MentorId::new(format!("m-{i}")))
            .collect();

        let event_day = start + Duration::days(19);
        let mut draft = EventDraft::new(
            "Simulated career day",
            Schedule::new(event_day.date(), event_day.time(), 90),
        );
        draft.required_mentor_count = Some(config.required_mentor_count);
        draft.initial_selected_mentors = mentors.clone();
        let seeded = open("s-0", "staff")?
            .create_event(draft)
            .context("seed simulated event")?
            .event;

        let mut agents = Vec::with_capacity(config.staff_count + config.mentor_count);
        for i in 0..config.staff_count {
            let session = open(&format!("s-{i}"), "staff")?;
            agents.push(SimulatedAgent::new(agents.len(), AgentKind::Staff, session));
        }
        for mentor in &mentors {
            let session = open(mentor.as_str(), "mentor")?;
            agents.push(SimulatedAgent::new(agents.len(), AgentKind::Mentor, session));
        }

        tracing::debug!(
            seed = config.seed,
            agents = agents.len(),
            write_mode = %config.write_mode,
            "simulation world ready"
        );
        Ok(Self {
            rng: DeterministicRng::new(config.seed),
            config,
            repo,
            clock,
            agents,
            mentors,
            event_id: seeded.id,
            initial_membership: seeded.membership,
            trace: Vec::new(),
        })
    }

    /// Run every round, then commit whatever plans are still held.
    ///
    /// # Errors
    ///
    /// Returns an error if the final repository read fails.
    pub fn run(&mut self) -> Result<SimulationResult> {
        for round in 0..self.config.rounds {
            self.clock.advance(Duration::minutes(1));
            let index = self.rng.next_bounded(self.agents.len());
            self.step(round, index);
        }

        let drain_round = self.config.rounds;
        for index in 0..self.agents.len() {
            if self.agents[index].pending().is_some() {
                self.commit(drain_round, index);
            }
        }

        let final_event = self
            .repo
            .select_one(&self.event_id)?
            .context("simulated event disappeared")?;
        let mentor_caches = self
            .agents
            .iter()
            .filter(|agent| agent.kind() == AgentKind::Mentor)
            .map(|agent| MentorCache {
                mentor: agent.session().actor().mentor_id(),
                cached: agent.session().store().get_by_id(&self.event_id),
            })
            .collect();

        Ok(SimulationResult {
            config: self.config,
            trace: self.trace.clone(),
            initial_membership: self.initial_membership.clone(),
            final_event,
            mentor_caches,
        })
    }

    fn step(&mut self, round: u64, index: usize) {
        if self.agents[index].pending().is_some() {
            if self.rng.hit_rate_percent(self.config.commit_percent) {
                self.commit(round, index);
            }
            return;
        }

        let agent = &mut self.agents[index];
        let (transition, mentor) = agent.choose(&mut self.rng, &self.mentors);
        let kind = match agent.plan(&self.event_id, transition, &mentor) {
            Ok(plan) => TraceKind::Planned {
                transition,
                mentor,
                read_version: plan.read_version,
            },
            Err(err) => TraceKind::Rejected {
                transition,
                mentor,
                code: err.code().code().to_owned(),
            },
        };
        self.record(round, index, kind);
    }

    fn commit(&mut self, round: u64, index: usize) {
        let Some((plan, result)) = self.agents[index].commit() else {
            return;
        };
        let kind = match result {
            Ok(outcome) => TraceKind::Committed {
                transition: plan.transition,
                mentor: plan.mentor,
                read_version: plan.read_version,
                version: outcome.event.version,
                membership: outcome.event.membership,
            },
            Err(EngineError::StaleRead { found, .. }) => TraceKind::Stale {
                transition: plan.transition,
                mentor: plan.mentor,
                read_version: plan.read_version,
                found,
            },
            Err(err) => TraceKind::Failed {
                transition: plan.transition,
                mentor: plan.mentor,
                code: err.code().code().to_owned(),
            },
        };
        self.record(round, index, kind);
    }

    fn record(&mut self, round: u64, agent: AgentId, kind: TraceKind) {
        tracing::trace!(round, agent, ?kind, "step");
        self.trace.push(TraceEntry { round, agent, kind });
    }
}
