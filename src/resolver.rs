//! Natural-key resolution of venues, performers and events.
//!
//! Every function takes the caller's open transaction, so a whole event with
//! its venue, performers, associations and tags commits or rolls back as one.
//! Resolution is lookup-then-insert on the natural key; two overlapping
//! writers can still race between the lookup and the insert.

use crate::error::{Result, ScraperError};
use crate::types::{Event, Performer, Venue};
use rusqlite::{params, OptionalExtension, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
enum TagOwner {
    Event,
    Performer,
}

impl TagOwner {
    fn delete_sql(self) -> &'static str {
        match self {
            TagOwner::Event => "DELETE FROM event_tag WHERE event_id = ?1",
            TagOwner::Performer => "DELETE FROM performer_tag WHERE performer_id = ?1",
        }
    }

    fn insert_sql(self) -> &'static str {
        match self {
            TagOwner::Event => "INSERT INTO event_tag (event_id, tag_id) VALUES (?1, ?2)",
            TagOwner::Performer => {
                "INSERT INTO performer_tag (performer_id, tag_id) VALUES (?1, ?2)"
            }
        }
    }
}

/// Resolves the venue by (name, address), inserting it on first sighting.
///
/// A venue first seen without an address gets its address filled in by the
/// first later sighting that carries one. A sighting without an address
/// resolves to the oldest venue of that name, so sources that only sometimes
/// print the address keep hitting the same row.
pub fn venue_must_exist(tx: &Transaction<'_>, venue: &mut Venue) -> Result<i64> {
    venue.validate()?;

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM venue WHERE name = ?1 AND address = ?2",
            params![venue.name, venue.address],
            |row| row.get(0),
        )
        .optional()?;

    let id = match existing {
        Some(id) => id,
        None => {
            let same_name = if venue.address.is_empty() {
                "SELECT id FROM venue WHERE name = ?1 ORDER BY id LIMIT 1"
            } else {
                "SELECT id FROM venue WHERE name = ?1 AND address = '' ORDER BY id LIMIT 1"
            };
            let candidate: Option<i64> = tx
                .query_row(same_name, params![venue.name], |row| row.get(0))
                .optional()?;

            match candidate {
                Some(id) if venue.address.is_empty() => {
                    debug!(venue = %venue.name, id, "Resolved address-less venue by name");
                    id
                }
                Some(id) => {
                    tx.execute(
                        "UPDATE venue SET address = ?2 WHERE id = ?1",
                        params![id, venue.address],
                    )?;
                    info!(venue = %venue.name, address = %venue.address, "Filled in venue address");
                    id
                }
                None => {
                    tx.execute(
                        "INSERT INTO venue (name, address) VALUES (?1, ?2)",
                        params![venue.name, venue.address],
                    )?;
                    let id = tx.last_insert_rowid();
                    info!(venue = %venue.name, id, "Created new venue");
                    id
                }
            }
        }
    };

    venue.id = Some(id);
    Ok(id)
}

/// Resolves the performer by (name, genre). Later sightings refresh the
/// descriptive fields (never with empty values) and replace the tag set;
/// links and images are replaced only when the draft carries some.
pub fn performer_must_exist(tx: &Transaction<'_>, performer: &mut Performer) -> Result<i64> {
    performer.validate()?;

    let existing: Option<i64> = match performer.id {
        Some(id) => tx
            .query_row("SELECT id FROM performer WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?,
        None => tx
            .query_row(
                "SELECT id FROM performer WHERE name = ?1 AND genre = ?2",
                params![performer.name, performer.genre],
                |row| row.get(0),
            )
            .optional()?,
    };

    let id = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE performer SET
                    info = COALESCE(NULLIF(?2, ''), info),
                    home = COALESCE(NULLIF(?3, ''), home),
                    listen_url = COALESCE(NULLIF(?4, ''), listen_url),
                    embed_url = COALESCE(NULLIF(?5, ''), embed_url)
                 WHERE id = ?1",
                params![
                    id,
                    performer.info,
                    performer.home,
                    performer.listen_url,
                    performer.embed_url
                ],
            )?;
            debug!(performer = %performer.name, id, "Updated existing performer");
            id
        }
        None => {
            if performer.id.is_some() {
                return Err(ScraperError::InvalidEntity(format!(
                    "performer '{}' carries an id that is not in the store",
                    performer.name
                )));
            }
            tx.execute(
                "INSERT INTO performer (name, info, genre, home, listen_url, embed_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    performer.name,
                    performer.info,
                    performer.genre,
                    performer.home,
                    performer.listen_url,
                    performer.embed_url
                ],
            )?;
            let id = tx.last_insert_rowid();
            info!(performer = %performer.name, genre = %performer.genre, id, "Created new performer");
            id
        }
    };

    replace_tags(tx, TagOwner::Performer, id, &performer.tags)?;

    if !performer.links.is_empty() {
        tx.execute(
            "DELETE FROM performer_extra WHERE performer_id = ?1",
            params![id],
        )?;
        for link in &performer.links {
            tx.execute(
                "INSERT INTO performer_extra (performer_id, uri, type, description)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, link.uri, link.kind, link.description],
            )?;
        }
    }

    if !performer.images.is_empty() {
        tx.execute(
            "DELETE FROM performer_image WHERE performer_id = ?1",
            params![id],
        )?;
        for (rendition, path) in &performer.images {
            tx.execute(
                "INSERT INTO performer_image (performer_id, rendition, path) VALUES (?1, ?2, ?3)",
                params![id, rendition, path],
            )?;
        }
    }

    performer.id = Some(id);
    Ok(id)
}

/// Resolves venue, then performers, then the event row on (venue, date),
/// then rewrites the performer associations and tags of the event.
///
/// The whole draft is validated before the first write.
pub fn event_must_exist(tx: &Transaction<'_>, event: &mut Event) -> Result<i64> {
    event.validate()?;
    let date = event
        .date_key()
        .ok_or_else(|| ScraperError::InvalidEntity("event without date".into()))?;
    let venue = event
        .venue
        .as_mut()
        .ok_or_else(|| ScraperError::InvalidEntity("event without venue".into()))?;

    let venue_id = venue_must_exist(tx, venue)?;

    let mut performer_ids = Vec::with_capacity(event.performers.len());
    for performer in event.performers.iter_mut() {
        let id = performer_must_exist(tx, performer)?;
        if !performer_ids.contains(&id) {
            performer_ids.push(id);
        }
    }

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM event WHERE venue_id = ?1 AND date = ?2",
            params![venue_id, date],
            |row| row.get(0),
        )
        .optional()?;

    let event_id = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE event SET type = ?2, description = ?3 WHERE id = ?1",
                params![id, event.kind, event.description],
            )?;
            debug!(event_id = id, %date, "Updated existing event");
            id
        }
        None => {
            tx.execute(
                "INSERT INTO event (venue_id, date, type, description, deleted, source)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![venue_id, date, event.kind, event.description, event.source],
            )?;
            let id = tx.last_insert_rowid();
            info!(event_id = id, %date, source = %event.source, "Created new event");
            id
        }
    };

    tx.execute(
        "DELETE FROM event_performer WHERE event_id = ?1",
        params![event_id],
    )?;
    for performer_id in &performer_ids {
        tx.execute(
            "INSERT INTO event_performer (event_id, performer_id) VALUES (?1, ?2)",
            params![event_id, performer_id],
        )?;
    }

    replace_tags(tx, TagOwner::Event, event_id, &event.tags)?;

    event.id = Some(event_id);
    Ok(event_id)
}

/// Tag vocabulary is append-only; only the owner's links are rewritten.
fn replace_tags(
    tx: &Transaction<'_>,
    owner: TagOwner,
    owner_id: i64,
    tags: &BTreeSet<String>,
) -> Result<()> {
    tx.execute(owner.delete_sql(), params![owner_id])?;
    for tag in tags {
        tx.execute("INSERT OR IGNORE INTO tag (tag) VALUES (?1)", params![tag])?;
        let tag_id: i64 =
            tx.query_row("SELECT id FROM tag WHERE tag = ?1", params![tag], |row| {
                row.get(0)
            })?;
        tx.execute(owner.insert_sql(), params![owner_id, tag_id])?;
    }
    Ok(())
}
