//! SQL schema for the Strata SQLite store.
//!
//! Applied at connection startup when `PRAGMA user_version` is behind
//! [`SCHEMA_VERSION`]. Future migrations will be gated on that number.

use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 1;

/// Bring the database up to [`SCHEMA_VERSION`].
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
  let version: i32 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
  if version < SCHEMA_VERSION {
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
  }
  Ok(())
}

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Catalog ─────────────────────────────────────────────────────────────────
-- Shared by every worker; rows are created with an optimistic INSERT and a
-- re-read on unique-constraint conflict, never updated afterwards.

CREATE TABLE IF NOT EXISTS signatures (
    signature_id TEXT PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    exec         TEXT NOT NULL,
    version      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gauges (
    gauge_id     TEXT PRIMARY KEY,
    signature_id TEXT NOT NULL REFERENCES signatures(signature_id),
    name         TEXT NOT NULL,
    system       TEXT NOT NULL DEFAULT '',   -- '' when the document omits it
    UNIQUE (signature_id, name, system)
);

CREATE TABLE IF NOT EXISTS annotation_cnfs (
    annotation_cnf_id TEXT PRIMARY KEY,
    signature_id      TEXT NOT NULL REFERENCES signatures(signature_id),
    name              TEXT NOT NULL,
    system            TEXT NOT NULL DEFAULT '',
    description       TEXT,
    UNIQUE (signature_id, name, system)
);

CREATE TABLE IF NOT EXISTS alert_groups (
    alert_group_id TEXT PRIMARY KEY,
    name           TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS alert_cnfs (
    alert_cnf_id   TEXT PRIMARY KEY,
    name           TEXT NOT NULL UNIQUE,
    severity       TEXT NOT NULL,
    description    TEXT,
    alert_group_id TEXT REFERENCES alert_groups(alert_group_id)
);

CREATE TABLE IF NOT EXISTS explicit_ref_groups (
    group_id TEXT PRIMARY KEY,
    name     TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS explicit_refs (
    explicit_ref_id TEXT PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    group_id        TEXT REFERENCES explicit_ref_groups(group_id),
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS explicit_ref_links (
    link_id              TEXT PRIMARY KEY,
    name                 TEXT NOT NULL,
    explicit_ref_id_from TEXT NOT NULL REFERENCES explicit_refs(explicit_ref_id),
    explicit_ref_id_to   TEXT NOT NULL REFERENCES explicit_refs(explicit_ref_id),
    UNIQUE (name, explicit_ref_id_from, explicit_ref_id_to)
);

-- ── Sources ─────────────────────────────────────────────────────────────────
-- The implicit rowid is the admission order used to break precedence ties.

CREATE TABLE IF NOT EXISTS sources (
    source_id                      TEXT PRIMARY KEY,
    name                           TEXT NOT NULL,
    signature_id                   TEXT NOT NULL REFERENCES signatures(signature_id),
    processor                      TEXT NOT NULL,
    version                        TEXT NOT NULL,
    validity_start                 TEXT NOT NULL,
    validity_stop                  TEXT NOT NULL,
    generation_time                TEXT NOT NULL,
    reception_time                 TEXT,
    ingestion_time                 TEXT NOT NULL,
    reported_validity_start        TEXT,
    reported_validity_stop         TEXT,
    reported_generation_time       TEXT,
    processing_duration            REAL,
    priority                       INTEGER,
    ingested                       INTEGER NOT NULL DEFAULT 1,
    ingestion_completeness         INTEGER,
    ingestion_completeness_message TEXT
);

-- Append-only; the latest row per source is its current status.
CREATE TABLE IF NOT EXISTS source_statuses (
    status_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id   TEXT NOT NULL REFERENCES sources(source_id),
    status      TEXT NOT NULL,   -- 'PENDING' | 'DELETED' | result code
    recorded_at TEXT NOT NULL,
    log         TEXT
);

-- ── Facts ───────────────────────────────────────────────────────────────────
-- Never deleted. Reconciliation only flips `visible` or narrows bounds.

CREATE TABLE IF NOT EXISTS events (
    event_id        TEXT PRIMARY KEY,
    gauge_id        TEXT NOT NULL REFERENCES gauges(gauge_id),
    source_id       TEXT NOT NULL REFERENCES sources(source_id),
    explicit_ref_id TEXT REFERENCES explicit_refs(explicit_ref_id),
    insertion_type  TEXT NOT NULL,
    start           TEXT NOT NULL,
    stop            TEXT NOT NULL,
    visible         INTEGER NOT NULL DEFAULT 1,
    ingestion_time  TEXT NOT NULL,
    split_from      TEXT REFERENCES events(event_id)
);

CREATE TABLE IF NOT EXISTS event_keys (
    event_id     TEXT PRIMARY KEY REFERENCES events(event_id),
    event_key    TEXT NOT NULL,
    signature_id TEXT NOT NULL REFERENCES signatures(signature_id),
    gauge_id     TEXT NOT NULL REFERENCES gauges(gauge_id),
    visible      INTEGER NOT NULL DEFAULT 1   -- mirrors events.visible
);

CREATE TABLE IF NOT EXISTS event_links (
    event_link_id TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    event_id_from TEXT NOT NULL REFERENCES events(event_id),
    event_id_to   TEXT NOT NULL REFERENCES events(event_id)
);

CREATE TABLE IF NOT EXISTS annotations (
    annotation_id     TEXT PRIMARY KEY,
    annotation_cnf_id TEXT NOT NULL REFERENCES annotation_cnfs(annotation_cnf_id),
    source_id         TEXT NOT NULL REFERENCES sources(source_id),
    explicit_ref_id   TEXT NOT NULL REFERENCES explicit_refs(explicit_ref_id),
    insertion_type    TEXT NOT NULL,
    visible           INTEGER NOT NULL DEFAULT 1,
    ingestion_time    TEXT NOT NULL
);

-- Value trees of events and annotations. `owner_id` is an event_id or an
-- annotation_id; children point at their object through `parent_id`.
CREATE TABLE IF NOT EXISTS entity_values (
    value_id        TEXT PRIMARY KEY,
    owner_id        TEXT NOT NULL,
    parent_id       TEXT REFERENCES entity_values(value_id),
    position        INTEGER NOT NULL,
    name            TEXT NOT NULL,
    value_type      TEXT NOT NULL,
    text_value      TEXT,
    boolean_value   INTEGER,
    double_value    REAL,
    timestamp_value TEXT,
    geometry_value  TEXT             -- JSON array of [lat, lon] pairs
);

CREATE TABLE IF NOT EXISTS alerts (
    alert_id          TEXT PRIMARY KEY,
    alert_cnf_id      TEXT NOT NULL REFERENCES alert_cnfs(alert_cnf_id),
    entity_kind       TEXT NOT NULL,   -- 'source' | 'event' | 'annotation' | 'explicit_ref'
    entity_id         TEXT NOT NULL,
    message           TEXT NOT NULL,
    generator         TEXT NOT NULL,
    notification_time TEXT NOT NULL,
    ingestion_time    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS sources_identity_idx
    ON sources(name, validity_start, validity_stop, generation_time, processor, version);
CREATE INDEX IF NOT EXISTS sources_scope_idx
    ON sources(signature_id, processor, validity_start, validity_stop);
CREATE INDEX IF NOT EXISTS source_statuses_source_idx ON source_statuses(source_id);
CREATE INDEX IF NOT EXISTS events_scope_idx
    ON events(gauge_id, explicit_ref_id, visible, start, stop);
CREATE INDEX IF NOT EXISTS events_source_idx    ON events(source_id, visible);
CREATE INDEX IF NOT EXISTS event_keys_key_idx   ON event_keys(event_key, visible);
CREATE INDEX IF NOT EXISTS event_links_from_idx ON event_links(event_id_from);
CREATE INDEX IF NOT EXISTS event_links_to_idx   ON event_links(event_id_to);
CREATE INDEX IF NOT EXISTS annotations_scope_idx
    ON annotations(annotation_cnf_id, explicit_ref_id, visible);
CREATE INDEX IF NOT EXISTS alerts_entity_idx    ON alerts(entity_id);
-- One value per name among siblings; the race guard of the value API.
CREATE UNIQUE INDEX IF NOT EXISTS entity_values_sibling_idx
    ON entity_values(owner_id, IFNULL(parent_id, ''), name);

PRAGMA user_version = 1;
";
