//! Session-resident event cache.
//!
//! The store loads the whole collection once and keeps it until told
//! otherwise; there is no expiry. Each load or refetch installs a fresh
//! [`Snapshot`] behind an `Arc`, so a reader holding a snapshot keeps a
//! complete collection while a replacement is built.
//!
//! Fetches and single-row patches are serialized through one mutex. A patch
//! can therefore never be overwritten by a refetch that started before it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::NaiveDateTime;

use crate::error::EngineError;
use crate::model::{Event, EventId, MembershipColumn, MentorId};
use crate::permissions::{Actor, can_mentor_view_event};
use crate::persist::{EventRepository, by_date};

/// Immutable view of the collection at one generation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    events: Vec<Event>,
    index: HashMap<EventId, usize>,
    generation: u64,
}

impl Snapshot {
    fn build(mut events: Vec<Event>, generation: u64) -> Self {
        events.sort_by(by_date);
        let index = events
            .iter()
            .enumerate()
            .map(|(pos, event)| (event.id.clone(), pos))
            .collect();
        Self {
            events,
            index,
            generation,
        }
    }

    /// Events ordered by date, start time, then id.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[must_use]
    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.index.get(id).map(|pos| &self.events[*pos])
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub struct EventStore {
    repo: Arc<dyn EventRepository>,
    current: RwLock<Option<Arc<Snapshot>>>,
    fetch: Mutex<()>,
    generation: AtomicU64,
    fetches: AtomicU64,
    closed: AtomicBool,
}

impl fmt::Debug for EventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStore")
            .field("loaded", &self.is_loaded())
            .field("generation", &self.generation())
            .field("fetches", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

impl EventStore {
    #[must_use]
    pub fn new(repo: Arc<dyn EventRepository>) -> Self {
        Self {
            repo,
            current: RwLock::new(None),
            fetch: Mutex::new(()),
            generation: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Resident snapshot, fetching on first use or after [`Self::invalidate`].
    ///
    /// # Errors
    ///
    /// [`EngineError::RemoteReadFailure`] when the initial fetch fails,
    /// [`EngineError::SessionEnded`] after [`Self::teardown`].
    pub fn load(&self) -> Result<Arc<Snapshot>, EngineError> {
        if let Some(snapshot) = self.snapshot() {
            tracing::trace!(generation = snapshot.generation, "event cache hit");
            return Ok(snapshot);
        }

        let _fetching = self.lock_fetch();
        // Another caller may have filled the cache while we waited.
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }
        self.fetch_locked()
    }

    /// Reload the full collection and swap it in.
    ///
    /// Safe to call redundantly or from several threads: calls run one at a
    /// time and each installs a complete snapshot. On failure the previous
    /// snapshot stays in place.
    ///
    /// # Errors
    ///
    /// [`EngineError::RemoteReadFailure`] or [`EngineError::SessionEnded`].
    pub fn refetch(&self) -> Result<Arc<Snapshot>, EngineError> {
        let _fetching = self.lock_fetch();
        self.fetch_locked()
    }

    /// Drop the resident snapshot; the next [`Self::load`] fetches again.
    pub fn invalidate(&self) {
        let _fetching = self.lock_fetch();
        *self.write_current() = None;
        tracing::debug!("event cache invalidated");
    }

    /// Cached row by id. Never performs I/O.
    #[must_use]
    pub fn get_by_id(&self, id: &EventId) -> Option<Event> {
        self.snapshot()?.get(id).cloned()
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace one cached row with an acknowledged repository row.
    ///
    /// Ignored when the cache is not loaded or already holds a newer version.
    /// Returns whether the cache changed.
    pub fn apply_patch(&self, event: Event) -> bool {
        let _fetching = self.lock_fetch();
        let Some(current) = self.snapshot() else {
            return false;
        };
        if current
            .get(&event.id)
            .is_some_and(|cached| cached.version > event.version)
        {
            tracing::debug!(event = %event.id, version = event.version, "ignoring stale cache patch");
            return false;
        }

        let id = event.id.clone();
        let mut events: Vec<Event> = current
            .events
            .iter()
            .filter(|cached| cached.id != id)
            .cloned()
            .collect();
        events.push(event);
        self.install(events);
        true
    }

    /// Drop one row from the cache. Returns whether it was present.
    pub fn remove(&self, id: &EventId) -> bool {
        let _fetching = self.lock_fetch();
        let Some(current) = self.snapshot() else {
            return false;
        };
        if current.get(id).is_none() {
            return false;
        }
        let events = current
            .events
            .iter()
            .filter(|cached| &cached.id != id)
            .cloned()
            .collect();
        self.install(events);
        true
    }

    /// Release the cache. Later loads and refetches fail with
    /// [`EngineError::SessionEnded`].
    pub fn teardown(&self) {
        let _fetching = self.lock_fetch();
        self.closed.store(true, Ordering::SeqCst);
        *self.write_current() = None;
        tracing::debug!("event cache torn down");
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Bumped on every snapshot install.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of full collection reads issued by this store.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Cached events where `mentor` is in `column`.
    #[must_use]
    pub fn events_for_mentor(&self, mentor: &MentorId, column: MembershipColumn) -> Vec<Event> {
        self.snapshot().map_or_else(Vec::new, |snapshot| {
            snapshot
                .events
                .iter()
                .filter(|event| event.membership.get(column).contains(mentor))
                .cloned()
                .collect()
        })
    }

    /// Cached events that have not started at `now`.
    #[must_use]
    pub fn upcoming(&self, now: NaiveDateTime) -> Vec<Event> {
        self.snapshot().map_or_else(Vec::new, |snapshot| {
            snapshot
                .events
                .iter()
                .filter(|event| !event.is_past(now))
                .cloned()
                .collect()
        })
    }

    /// Cached events `actor` may see under the mentor allowlist rule.
    #[must_use]
    pub fn visible_to(&self, actor: &Actor) -> Vec<Event> {
        self.snapshot().map_or_else(Vec::new, |snapshot| {
            snapshot
                .events
                .iter()
                .filter(|event| can_mentor_view_event(event, actor))
                .cloned()
                .collect()
        })
    }

    fn fetch_locked(&self) -> Result<Arc<Snapshot>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::SessionEnded);
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let events = self
            .repo
            .select_all()
            .map_err(EngineError::RemoteReadFailure)?;
        let snapshot = self.install(events);
        tracing::debug!(
            events = snapshot.len(),
            generation = snapshot.generation,
            "event cache fetched"
        );
        Ok(snapshot)
    }

    fn install(&self, events: Vec<Event>) -> Arc<Snapshot> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(Snapshot::build(events, generation));
        *self.write_current() = Some(Arc::clone(&snapshot));
        snapshot
    }

    fn lock_fetch(&self) -> MutexGuard<'_, ()> {
        self.fetch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_current(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<Snapshot>>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}
