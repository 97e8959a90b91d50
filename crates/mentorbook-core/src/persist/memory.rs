//! In-process event repository.
//!
//! Shared by every session of a process (tests, simulator). Rows live in a
//! `Mutex<BTreeMap>`; change notices are published after the lock is
//! released so push handlers may read the repository again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{EventPatch, EventRepository, PersistError, by_date, check_row, check_version};
use crate::model::{Event, EventId};
use crate::push::{ChangeKind, ChangePublisher};

#[derive(Default)]
pub struct MemoryRepository {
    rows: Mutex<BTreeMap<EventId, Event>>,
    publisher: Option<Arc<dyn ChangePublisher>>,
    fail_writes: AtomicUsize,
    fail_reads: AtomicUsize,
    full_reads: AtomicU64,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository that publishes every committed write to `publisher`.
    #[must_use]
    pub fn with_publisher(publisher: Arc<dyn ChangePublisher>) -> Self {
        Self {
            publisher: Some(publisher),
            ..Self::default()
        }
    }

    /// Make the next `count` writes fail with [`PersistError::Unavailable`].
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reads fail with [`PersistError::Unavailable`].
    pub fn fail_next_reads(&self, count: usize) {
        self.fail_reads.store(count, Ordering::SeqCst);
    }

    /// Number of `select_all` calls served.
    #[must_use]
    pub fn full_reads(&self) -> u64 {
        self.full_reads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<EventId, Event>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected(counter: &AtomicUsize, what: &str) -> Result<(), PersistError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            Err(PersistError::Unavailable(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }

    fn publish(&self, kind: ChangeKind, old: Option<&Event>, new: Option<&Event>) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(kind, old, new);
        }
    }
}

impl std::fmt::Debug for MemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRepository")
            .field("rows", &self.len())
            .field("publishes", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

impl EventRepository for MemoryRepository {
    fn insert(&self, event: &Event) -> Result<Event, PersistError> {
        Self::injected(&self.fail_writes, "write")?;
        check_row(event)?;

        let mut stored = event.clone();
        stored.version = 1;
        {
            let mut rows = self.rows();
            if rows.contains_key(&stored.id) {
                return Err(PersistError::Duplicate(stored.id));
            }
            rows.insert(stored.id.clone(), stored.clone());
        }

        self.publish(ChangeKind::Insert, None, Some(&stored));
        Ok(stored)
    }

    fn update(
        &self,
        id: &EventId,
        patch: &EventPatch,
        expected_version: Option<u64>,
    ) -> Result<Event, PersistError> {
        Self::injected(&self.fail_writes, "write")?;

        let (old, new) = {
            let mut rows = self.rows();
            let row = rows
                .get_mut(id)
                .ok_or_else(|| PersistError::NotFound(id.clone()))?;
            check_version(id, expected_version, row.version)?;

            let mut next = row.clone();
            patch.apply_to(&mut next);
            next.version = row.version + 1;
            check_row(&next)?;

            let old = std::mem::replace(row, next.clone());
            (old, next)
        };

        self.publish(ChangeKind::Update, Some(&old), Some(&new));
        Ok(new)
    }

    fn select_all(&self) -> Result<Vec<Event>, PersistError> {
        Self::injected(&self.fail_reads, "read")?;
        self.full_reads.fetch_add(1, Ordering::SeqCst);

        let mut events: Vec<Event> = self.rows().values().cloned().collect();
        events.sort_by(by_date);
        Ok(events)
    }

    fn select_one(&self, id: &EventId) -> Result<Option<Event>, PersistError> {
        Self::injected(&self.fail_reads, "read")?;
        Ok(self.rows().get(id).cloned())
    }

    fn delete(&self, id: &EventId, expected_version: Option<u64>) -> Result<(), PersistError> {
        Self::injected(&self.fail_writes, "write")?;

        let old = {
            let mut rows = self.rows();
            let row = rows.get(id).ok_or_else(|| PersistError::NotFound(id.clone()))?;
            check_version(id, expected_version, row.version)?;
            rows.remove(id)
        };

        self.publish(ChangeKind::Delete, old.as_ref(), None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryRepository;
    use crate::model::event::fixtures::{at, mentors, sample_event};
    use crate::model::{Event, MembershipSets};
    use crate::persist::{EventPatch, EventRepository, PersistError};
    use crate::model::MembershipColumn;
    use crate::push::{ChangeFilter, ChangeKind, ChangeNotice, PushChannel, PushHub};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn requesting(ids: &[&str]) -> EventPatch {
        EventPatch::at(at((2031, 2, 1), (8, 0))).with_membership(MembershipSets {
            requesting: mentors(ids),
            ..MembershipSets::default()
        })
    }

    #[test]
    fn insert_assigns_first_version() {
        let repo = MemoryRepository::new();
        let mut event = sample_event();
        event.version = 99;
        let stored = repo.insert(&event).expect("insert");
        assert_eq!(stored.version, 1);
        assert!(matches!(repo.insert(&event), Err(PersistError::Duplicate(_))));
    }

    #[test]
    fn conditional_update_rejects_stale_version() {
        let repo = MemoryRepository::new();
        let stored = repo.insert(&sample_event()).expect("insert");

        let updated = repo
            .update(&stored.id, &requesting(&["m1"]), Some(stored.version))
            .expect("first writer");
        assert_eq!(updated.version, 2);

        let err = repo
            .update(&stored.id, &requesting(&["m2"]), Some(stored.version))
            .expect_err("second writer read version 1");
        assert!(matches!(
            err,
            PersistError::VersionConflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
        let row = repo.select_one(&stored.id).expect("read").expect("row");
        assert_eq!(row.membership.requesting, mentors(&["m1"]));
    }

    #[test]
    fn unconditional_update_is_last_write_wins() {
        let repo = MemoryRepository::new();
        let stored = repo.insert(&sample_event()).expect("insert");

        repo.update(&stored.id, &requesting(&["m1"]), None).expect("first");
        repo.update(&stored.id, &requesting(&["m2"]), None).expect("second");

        let row = repo.select_one(&stored.id).expect("read").expect("row");
        assert_eq!(row.membership.requesting, mentors(&["m2"]));
        assert_eq!(row.version, 3);
    }

    #[test]
    fn update_rejects_broken_rows() {
        let repo = MemoryRepository::new();
        let stored = repo.insert(&sample_event()).expect("insert");
        let patch = EventPatch::at(at((2031, 2, 1), (8, 0))).with_membership(MembershipSets {
            requesting: mentors(&["m1"]),
            accepted: mentors(&["m1"]),
            declined: Vec::new(),
        });
        assert!(matches!(
            repo.update(&stored.id, &patch, None),
            Err(PersistError::Rejected(_))
        ));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let repo = MemoryRepository::new();
        repo.fail_next_writes(1);
        assert!(matches!(
            repo.insert(&sample_event()),
            Err(PersistError::Unavailable(_))
        ));
        repo.insert(&sample_event()).expect("second attempt succeeds");

        repo.fail_next_reads(1);
        assert!(repo.select_all().is_err());
        assert_eq!(repo.select_all().expect("read").len(), 1);
        assert_eq!(repo.full_reads(), 1);
    }

    #[test]
    fn select_all_is_date_ordered() {
        let repo = MemoryRepository::new();
        let mut later = sample_event();
        later.id = "ev-later".into();
        let mut earlier: Event = sample_event();
        earlier.id = "ev-earlier".into();
        earlier.schedule.date = at((2031, 4, 1), (0, 0)).date();
        repo.insert(&later).expect("insert");
        repo.insert(&earlier).expect("insert");

        let ids: Vec<String> = repo
            .select_all()
            .expect("read")
            .into_iter()
            .map(|event| event.id.to_string())
            .collect();
        assert_eq!(ids, ["ev-earlier", "ev-later"]);
    }

    #[test]
    fn writes_publish_after_commit() {
        let hub = Arc::new(PushHub::new());
        let repo = Arc::new(MemoryRepository::with_publisher(hub.clone()));
        let seen = Arc::new(AtomicUsize::new(0));

        let reader = Arc::clone(&repo);
        let counter = Arc::clone(&seen);
        hub.subscribe(
            ChangeFilter::new(MembershipColumn::Requesting, "m1".into()),
            Arc::new(move |notice: &ChangeNotice| {
                // The repository is unlocked and reflects the committed write.
                let row = reader.select_one(&notice.event_id).expect("read");
                match notice.kind {
                    ChangeKind::Delete => assert!(row.is_none()),
                    _ => assert_eq!(
                        row.expect("row").membership.requesting,
                        mentors(&["m1"])
                    ),
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let stored = repo.insert(&sample_event()).expect("insert");
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        repo.update(&stored.id, &requesting(&["m1"]), None).expect("update");
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        repo.delete(&stored.id, Some(2)).expect("delete");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
