//! Durable event repository on a `SQLite` file.
//!
//! Connection defaults match the rest of the workspace:
//! - `journal_mode = WAL` so readers never block the single writer
//! - `busy_timeout = 5s` to absorb short lock contention between processes
//! - `foreign_keys = ON`
//!
//! Conditional updates are a single `UPDATE ... WHERE version = ?`; when no
//! row changes, a follow-up read tells a version conflict from a missing row.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{EventPatch, EventRepository, PersistError, check_row, check_version, migrations, schema};
use crate::model::{Event, EventId, MembershipSets, Schedule};
use crate::push::{ChangeKind, ChangePublisher};

/// Busy timeout used for event store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

pub struct SqliteRepository {
    conn: Mutex<Connection>,
    publisher: Option<Arc<dyn ChangePublisher>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path`, apply pragmas and migrate.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or opening,
    /// configuring or migrating the database fails.
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                PersistError::Unavailable(format!(
                    "create event store directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if configuring or migrating fails.
    pub fn open_in_memory() -> Result<Self, PersistError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, PersistError> {
        configure_connection(&conn)?;
        let version = migrations::migrate(&mut conn)?;
        tracing::debug!(schema_version = version, "event store ready");
        Ok(Self {
            conn: Mutex::new(conn),
            publisher: None,
        })
    }

    /// Publish every committed write to `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn ChangePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, kind: ChangeKind, old: Option<&Event>, new: Option<&Event>) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(kind, old, new);
        }
    }
}

impl std::fmt::Debug for SqliteRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRepository")
            .field("publishes", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

fn to_micros(at: NaiveDateTime) -> i64 {
    at.and_utc().timestamp_micros()
}

fn version_to_sql(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

fn encode<T: Serialize>(value: &T) -> Result<String, PersistError> {
    Ok(serde_json::to_string(value)?)
}

/// Raw column values, decoded outside the rusqlite row callback so decoding
/// failures surface as [`PersistError::Corrupt`].
struct RawRow {
    event_id: String,
    title: String,
    description: Option<String>,
    event_date: String,
    start_time: String,
    duration_minutes: i64,
    required_mentor_count: i64,
    requesting: String,
    accepted: String,
    declined: String,
    locked: bool,
    staff: String,
    product_id: Option<String>,
    initial_mentors: String,
    required_traits: String,
    version: i64,
    created_at_us: i64,
    updated_at_us: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            event_date: row.get(3)?,
            start_time: row.get(4)?,
            duration_minutes: row.get(5)?,
            required_mentor_count: row.get(6)?,
            requesting: row.get(7)?,
            accepted: row.get(8)?,
            declined: row.get(9)?,
            locked: row.get(10)?,
            staff: row.get(11)?,
            product_id: row.get(12)?,
            initial_mentors: row.get(13)?,
            required_traits: row.get(14)?,
            version: row.get(15)?,
            created_at_us: row.get(16)?,
            updated_at_us: row.get(17)?,
        })
    }

    fn corrupt(&self, reason: impl Into<String>) -> PersistError {
        PersistError::Corrupt {
            event_id: self.event_id.clone(),
            reason: reason.into(),
        }
    }

    fn json<T: DeserializeOwned>(&self, column: &str, raw: &str) -> Result<T, PersistError> {
        serde_json::from_str(raw).map_err(|err| self.corrupt(format!("{column}: {err}")))
    }

    fn instant(&self, column: &str, micros: i64) -> Result<NaiveDateTime, PersistError> {
        DateTime::from_timestamp_micros(micros)
            .map(|at| at.naive_utc())
            .ok_or_else(|| self.corrupt(format!("{column}: timestamp out of range")))
    }

    fn into_event(self) -> Result<Event, PersistError> {
        let date = NaiveDate::parse_from_str(&self.event_date, DATE_FORMAT)
            .map_err(|err| self.corrupt(format!("event_date: {err}")))?;
        let start = NaiveTime::parse_from_str(&self.start_time, TIME_FORMAT)
            .map_err(|err| self.corrupt(format!("start_time: {err}")))?;
        let duration_minutes = u32::try_from(self.duration_minutes)
            .map_err(|_| self.corrupt("duration_minutes out of range"))?;
        let required_mentor_count = u32::try_from(self.required_mentor_count)
            .map_err(|_| self.corrupt("required_mentor_count out of range"))?;
        let version =
            u64::try_from(self.version).map_err(|_| self.corrupt("version out of range"))?;

        let membership = MembershipSets {
            requesting: self.json("requesting_json", &self.requesting)?,
            accepted: self.json("accepted_json", &self.accepted)?,
            declined: self.json("declined_json", &self.declined)?,
        };
        let staff_members = self.json("staff_json", &self.staff)?;
        let initial_selected_mentors = self.json("initial_mentors_json", &self.initial_mentors)?;
        let required_traits = self.json("required_traits_json", &self.required_traits)?;
        let created_at = self.instant("created_at_us", self.created_at_us)?;
        let updated_at = self.instant("updated_at_us", self.updated_at_us)?;

        Ok(Event {
            id: EventId::new(self.event_id),
            title: self.title,
            description: self.description,
            schedule: Schedule::new(date, start, duration_minutes),
            required_mentor_count,
            membership,
            locked: self.locked,
            staff_members,
            product_id: self.product_id.map(Into::into),
            initial_selected_mentors,
            required_traits,
            version,
            created_at,
            updated_at,
        })
    }
}

fn read_one(conn: &Connection, id: &EventId) -> Result<Option<Event>, PersistError> {
    let sql = format!("SELECT {} FROM events WHERE event_id = ?1", schema::EVENT_COLUMNS);
    let raw = conn
        .query_row(&sql, [id.as_str()], RawRow::from_row)
        .optional()?;
    raw.map(RawRow::into_event).transpose()
}

fn write_row(conn: &Connection, event: &Event, expected: Option<u64>) -> Result<usize, PersistError> {
    let sql = "UPDATE events SET
            title = ?2, description = ?3, event_date = ?4, start_time = ?5,
            duration_minutes = ?6, required_mentor_count = ?7,
            requesting_json = ?8, accepted_json = ?9, declined_json = ?10,
            locked = ?11, staff_json = ?12, version = version + 1, updated_at_us = ?13
        WHERE event_id = ?1 AND (?14 IS NULL OR version = ?14)";
    let changed = conn.execute(
        sql,
        params![
            event.id.as_str(),
            event.title,
            event.description,
            event.schedule.date.format(DATE_FORMAT).to_string(),
            event.schedule.start.format(TIME_FORMAT).to_string(),
            event.schedule.duration_minutes,
            event.required_mentor_count,
            encode(&event.membership.requesting)?,
            encode(&event.membership.accepted)?,
            encode(&event.membership.declined)?,
            event.locked,
            encode(&event.staff_members)?,
            to_micros(event.updated_at),
            expected.map(version_to_sql),
        ],
    )?;
    Ok(changed)
}

impl EventRepository for SqliteRepository {
    fn insert(&self, event: &Event) -> Result<Event, PersistError> {
        check_row(event)?;
        let mut stored = event.clone();
        stored.version = 1;

        {
            let conn = self.conn();
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM events WHERE event_id = ?1)",
                [stored.id.as_str()],
                |row| row.get(0),
            )?;
            if exists {
                return Err(PersistError::Duplicate(stored.id));
            }

            conn.execute(
                "INSERT INTO events (
                    event_id, title, description, event_date, start_time, duration_minutes,
                    required_mentor_count, requesting_json, accepted_json, declined_json,
                    locked, staff_json, product_id, initial_mentors_json, required_traits_json,
                    version, created_at_us, updated_at_us
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 1, ?16, ?17)",
                params![
                    stored.id.as_str(),
                    stored.title,
                    stored.description,
                    stored.schedule.date.format(DATE_FORMAT).to_string(),
                    stored.schedule.start.format(TIME_FORMAT).to_string(),
                    stored.schedule.duration_minutes,
                    stored.required_mentor_count,
                    encode(&stored.membership.requesting)?,
                    encode(&stored.membership.accepted)?,
                    encode(&stored.membership.declined)?,
                    stored.locked,
                    encode(&stored.staff_members)?,
                    stored.product_id.as_ref().map(|id| id.as_str().to_string()),
                    encode(&stored.initial_selected_mentors)?,
                    encode(&stored.required_traits)?,
                    to_micros(stored.created_at),
                    to_micros(stored.updated_at),
                ],
            )?;
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
        let (old, new) = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;

            let old = read_one(&tx, id)?.ok_or_else(|| PersistError::NotFound(id.clone()))?;
            check_version(id, expected_version, old.version)?;

            let mut next = old.clone();
            patch.apply_to(&mut next);
            check_row(&next)?;

            if write_row(&tx, &next, expected_version)? == 0 {
                // Another connection bumped the row between our read and write.
                let found = read_one(&tx, id)?.map_or(0, |row| row.version);
                return Err(PersistError::VersionConflict {
                    event_id: id.clone(),
                    expected: expected_version.unwrap_or(old.version),
                    found,
                });
            }
            let new = read_one(&tx, id)?.ok_or_else(|| PersistError::NotFound(id.clone()))?;
            tx.commit()?;
            (old, new)
        };

        self.publish(ChangeKind::Update, Some(&old), Some(&new));
        Ok(new)
    }

    fn select_all(&self) -> Result<Vec<Event>, PersistError> {
        let raws = {
            let conn = self.conn();
            let sql = format!(
                "SELECT {} FROM events ORDER BY event_date, start_time, event_id",
                schema::EVENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], RawRow::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raws.into_iter().map(RawRow::into_event).collect()
    }

    fn select_one(&self, id: &EventId) -> Result<Option<Event>, PersistError> {
        read_one(&self.conn(), id)
    }

    fn delete(&self, id: &EventId, expected_version: Option<u64>) -> Result<(), PersistError> {
        let old = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let old = read_one(&tx, id)?.ok_or_else(|| PersistError::NotFound(id.clone()))?;
            check_version(id, expected_version, old.version)?;
            tx.execute("DELETE FROM events WHERE event_id = ?1", [id.as_str()])?;
            tx.commit()?;
            old
        };

        self.publish(ChangeKind::Delete, Some(&old), None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, SqliteRepository};
    use crate::model::event::fixtures::{at, mentors, sample_event};
    use crate::model::{MembershipColumn, MembershipSets, ProductId};
    use crate::persist::{EventPatch, EventRepository, PersistError, migrations};
    use crate::push::{ChangeFilter, ChangeNotice, PushChannel, PushHub};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn temp_repo() -> (TempDir, SqliteRepository) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let repo = SqliteRepository::open(&dir.path().join("store/events.sqlite3"))
            .expect("open event store");
        (dir, repo)
    }

    #[test]
    fn open_sets_pragmas_and_migrates() {
        let (_dir, repo) = temp_repo();
        let conn = repo.conn();

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("busy_timeout");
        assert_eq!(u128::from(busy_timeout_ms), DEFAULT_BUSY_TIMEOUT.as_millis());

        assert_eq!(
            migrations::current_schema_version(&conn).expect("version"),
            migrations::LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn rows_survive_reopen() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("events.sqlite3");

        let mut event = sample_event();
        event.product_id = Some(ProductId::from("p-workshop"));
        event.required_traits = vec!["first-aid".to_string()];
        event.description = Some("Bring slides".to_string());
        {
            let repo = SqliteRepository::open(&path).expect("open");
            repo.insert(&event).expect("insert");
        }

        let repo = SqliteRepository::open(&path).expect("reopen");
        let row = repo
            .select_one(&event.id)
            .expect("read")
            .expect("row present");
        assert_eq!(row, event);
    }

    #[test]
    fn conditional_update_bumps_version_and_detects_conflicts() {
        let (_dir, repo) = temp_repo();
        let stored = repo.insert(&sample_event()).expect("insert");

        let patch = EventPatch::at(at((2031, 2, 1), (8, 0))).with_membership(MembershipSets {
            requesting: mentors(&["m1"]),
            ..MembershipSets::default()
        });
        let updated = repo.update(&stored.id, &patch, Some(1)).expect("update");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.membership.requesting, mentors(&["m1"]));
        assert_eq!(updated.updated_at, at((2031, 2, 1), (8, 0)));

        assert!(matches!(
            repo.update(&stored.id, &patch, Some(1)),
            Err(PersistError::VersionConflict { expected: 1, found: 2, .. })
        ));
        assert_eq!(repo.update(&stored.id, &patch, None).expect("lww").version, 3);
    }

    #[test]
    fn missing_rows_are_reported() {
        let (_dir, repo) = temp_repo();
        let patch = EventPatch::at(at((2031, 2, 1), (8, 0))).with_locked(true);
        assert!(matches!(
            repo.update(&"ev-none".into(), &patch, None),
            Err(PersistError::NotFound(_))
        ));
        assert!(matches!(
            repo.delete(&"ev-none".into(), None),
            Err(PersistError::NotFound(_))
        ));
        assert!(repo.select_one(&"ev-none".into()).expect("read").is_none());
    }

    #[test]
    fn select_all_orders_by_date_then_start() {
        let (_dir, repo) = temp_repo();
        for (id, day, hour) in [("ev-c", 21, 9), ("ev-a", 20, 14), ("ev-b", 20, 9)] {
            let mut event = sample_event();
            event.id = id.into();
            let start = at((2031, 5, day), (hour, 0));
            event.schedule.date = start.date();
            event.schedule.start = start.time();
            repo.insert(&event).expect("insert");
        }

        let ids: Vec<String> = repo
            .select_all()
            .expect("read")
            .iter()
            .map(|event| event.id.to_string())
            .collect();
        assert_eq!(ids, ["ev-b", "ev-a", "ev-c"]);
    }

    #[test]
    fn delete_publishes_old_image() {
        let hub = Arc::new(PushHub::new());
        let repo = SqliteRepository::open_in_memory()
            .expect("open")
            .with_publisher(hub.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        hub.subscribe(
            ChangeFilter::new(MembershipColumn::Accepted, "m1".into()),
            Arc::new(move |_notice: &ChangeNotice| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut event = sample_event();
        event.membership.accepted = mentors(&["m1"]);
        let stored = repo.insert(&event).expect("insert");
        repo.delete(&stored.id, Some(1)).expect("delete");

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(repo.select_all().expect("read").is_empty());
    }
}
