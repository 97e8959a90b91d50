//! `SQLite` schema for the durable event table.
//!
//! - `events` holds one row per bookable event; the three membership sets, the
//!   staff list and the product snapshots are JSON arrays replaced wholesale
//!   on every write
//! - `version` is the row stamp used by conditional updates
//! - `store_meta` records the schema version alongside `PRAGMA user_version`

/// Migration v1: event table plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY,
    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
    description TEXT,
    event_date TEXT NOT NULL,
    start_time TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL CHECK (duration_minutes >= 1),
    required_mentor_count INTEGER NOT NULL CHECK (required_mentor_count >= 1),
    requesting_json TEXT NOT NULL DEFAULT '[]',
    accepted_json TEXT NOT NULL DEFAULT '[]',
    declined_json TEXT NOT NULL DEFAULT '[]',
    locked INTEGER NOT NULL DEFAULT 0 CHECK (locked IN (0, 1)),
    staff_json TEXT NOT NULL,
    product_id TEXT,
    initial_mentors_json TEXT NOT NULL DEFAULT '[]',
    version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: product trait snapshot and the date-ordered read index.
pub const MIGRATION_V2_SQL: &str = r"
ALTER TABLE events ADD COLUMN required_traits_json TEXT NOT NULL DEFAULT '[]';

CREATE INDEX IF NOT EXISTS idx_events_date_start
    ON events(event_date, start_time, event_id);

CREATE INDEX IF NOT EXISTS idx_events_product
    ON events(product_id);
";

/// Indexes expected by the repository read paths.
pub const REQUIRED_INDEXES: &[&str] = &["idx_events_date_start", "idx_events_product"];

/// Column list shared by every `SELECT` over `events`.
pub const EVENT_COLUMNS: &str = "event_id, title, description, event_date, start_time, \
     duration_minutes, required_mentor_count, requesting_json, accepted_json, declined_json, \
     locked, staff_json, product_id, initial_mentors_json, required_traits_json, version, \
     created_at_us, updated_at_us";
