use crate::error::{Result, ScraperError};
use crate::types::{format_db_date, Link, Performer};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS venue (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT NOT NULL,
    address  TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS venue_name_address ON venue (name, address);

CREATE TABLE IF NOT EXISTS performer (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    info        TEXT NOT NULL DEFAULT '',
    genre       TEXT NOT NULL,
    home        TEXT NOT NULL DEFAULT '',
    listen_url  TEXT NOT NULL DEFAULT '',
    embed_url   TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS performer_name_genre ON performer (name, genre);

CREATE TABLE IF NOT EXISTS event (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    venue_id     INTEGER NOT NULL REFERENCES venue (id),
    date         TEXT NOT NULL,
    type         TEXT NOT NULL DEFAULT '',
    description  TEXT NOT NULL DEFAULT '',
    deleted      INTEGER NOT NULL DEFAULT 0,
    source       TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS event_venue_date ON event (venue_id, date);

CREATE TABLE IF NOT EXISTS event_performer (
    event_id      INTEGER NOT NULL REFERENCES event (id),
    performer_id  INTEGER NOT NULL REFERENCES performer (id)
);
CREATE INDEX IF NOT EXISTS event_performer_event ON event_performer (event_id);

CREATE TABLE IF NOT EXISTS tag (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    tag  TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS event_tag (
    event_id  INTEGER NOT NULL REFERENCES event (id),
    tag_id    INTEGER NOT NULL REFERENCES tag (id)
);
CREATE TABLE IF NOT EXISTS performer_tag (
    performer_id  INTEGER NOT NULL REFERENCES performer (id),
    tag_id        INTEGER NOT NULL REFERENCES tag (id)
);

CREATE TABLE IF NOT EXISTS event_extra (
    event_id     INTEGER NOT NULL REFERENCES event (id),
    uri          TEXT NOT NULL,
    type         TEXT NOT NULL DEFAULT '',
    description  TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS performer_extra (
    performer_id  INTEGER NOT NULL REFERENCES performer (id),
    uri           TEXT NOT NULL,
    type          TEXT NOT NULL DEFAULT '',
    description   TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS performer_image (
    performer_id  INTEGER NOT NULL REFERENCES performer (id),
    rendition     TEXT NOT NULL,
    path          TEXT NOT NULL
);
"#;

/// Tables the read API queries; used to validate `count_rows` input.
const TABLES: &[&str] = &[
    "venue",
    "performer",
    "event",
    "event_performer",
    "tag",
    "event_tag",
    "performer_tag",
    "event_extra",
    "performer_extra",
    "performer_image",
];

/// Single embedded store shared by all ingestion transactions.
///
/// The connection sits behind a mutex that is only ever held for synchronous
/// work, never across an await point.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!("Opened event store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        debug!("Schema is up to date");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ScraperError::Api {
            message: "event store connection mutex poisoned".into(),
        })
    }

    /// Runs `work` inside one transaction: commit when it returns `Ok`,
    /// roll back on `Err` (the transaction is dropped uncommitted).
    pub fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = work(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Exact (name, genre) catalog lookup, returning the full stored record.
    pub fn find_performer(&self, name: &str, genre: &str) -> Result<Option<Performer>> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT id, name, info, genre, home, listen_url, embed_url
                 FROM performer WHERE name = ?1 AND genre = ?2",
                params![name, genre],
                |row| {
                    Ok(Performer {
                        id: Some(row.get(0)?),
                        name: row.get(1)?,
                        info: row.get(2)?,
                        genre: row.get(3)?,
                        home: row.get(4)?,
                        listen_url: row.get(5)?,
                        embed_url: row.get(6)?,
                        ..Default::default()
                    })
                },
            )
            .optional()?;

        let Some(mut performer) = found else {
            return Ok(None);
        };
        let id = performer.id.unwrap_or_default();

        let mut stmt = conn.prepare(
            "SELECT t.tag FROM performer_tag pt JOIN tag t ON t.id = pt.tag_id
             WHERE pt.performer_id = ?1",
        )?;
        performer.tags = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = conn.prepare(
            "SELECT uri, type, description FROM performer_extra
             WHERE performer_id = ?1 ORDER BY rowid",
        )?;
        performer.links = stmt
            .query_map(params![id], |row| {
                Ok(Link {
                    uri: row.get(0)?,
                    kind: row.get(1)?,
                    description: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt =
            conn.prepare("SELECT rendition, path FROM performer_image WHERE performer_id = ?1")?;
        performer.images = stmt
            .query_map(params![id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(Some(performer))
    }

    /// Soft-deletes every live event dated strictly before `now`.
    /// Returns the number of rows newly flagged.
    pub fn cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        let now = format_db_date(&now);
        let flagged = self.lock()?.execute(
            "UPDATE event SET deleted = 1
             WHERE deleted = 0 AND julianday(date) < julianday(?1)",
            params![now],
        )?;
        info!(flagged, "Soft-deleted past events");
        Ok(flagged)
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        if !TABLES.contains(&table) {
            return Err(ScraperError::Api {
                message: format!("unknown table '{}'", table),
            });
        }
        let count = self
            .lock()?
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    /// Performer names linked to an event, sorted
    pub fn event_performers(&self, event_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT p.name FROM event_performer ep JOIN performer p ON p.id = ep.performer_id
             WHERE ep.event_id = ?1 ORDER BY p.name",
        )?;
        let names = stmt
            .query_map(params![event_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(names)
    }

    /// Tags linked to an event, sorted
    pub fn event_tags(&self, event_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.tag FROM event_tag et JOIN tag t ON t.id = et.tag_id
             WHERE et.event_id = ?1 ORDER BY t.tag",
        )?;
        let tags = stmt
            .query_map(params![event_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(tags)
    }

    /// Stored (date, deleted) of an event
    pub fn event_status(&self, event_id: i64) -> Result<Option<(String, bool)>> {
        let status = self
            .lock()?
            .query_row(
                "SELECT date, deleted FROM event WHERE id = ?1",
                params![event_id],
                |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
            )
            .optional()?;
        Ok(status)
    }
}
