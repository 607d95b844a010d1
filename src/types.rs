use crate::constants::DB_DATE_FORMAT;
use crate::error::{Result, ScraperError};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A place events happen at. Identity is the (name, address) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Option<i64>,
    pub name: String,
    pub address: String,
}

impl Venue {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            address: address.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ScraperError::InvalidEntity("venue without name".into()));
        }
        Ok(())
    }
}

/// An external URI attached to a performer (social profile, shop, homepage)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link {
    pub uri: String,
    pub kind: String,
    pub description: String,
}

/// A band or artist. Identity is the (name, genre) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performer {
    pub id: Option<i64>,
    pub name: String,
    pub info: String,
    pub genre: String,
    pub home: String,
    pub listen_url: String,
    pub embed_url: String,
    /// Rendition name → local path of the mirrored image
    pub images: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
    pub links: Vec<Link>,
}

impl Performer {
    pub fn new(name: impl Into<String>, genre: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            genre: genre.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ScraperError::InvalidEntity("performer without name".into()));
        }
        if self.genre.trim().is_empty() {
            return Err(ScraperError::InvalidEntity(format!(
                "performer '{}' without genre",
                self.name
            )));
        }
        Ok(())
    }
}

/// A user annotation on an event. Written by the read API, never by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UTag {
    pub username: String,
    pub values: Vec<String>,
}

/// A concert listing. Drafts come out of sources with `id == None`;
/// once persisted the identity is the (venue, date) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<i64>,
    pub venue: Option<Venue>,
    /// Source-local timestamp
    pub date: Option<DateTime<FixedOffset>>,
    pub kind: String,
    pub description: String,
    pub source: String,
    pub deleted: bool,
    pub performers: Vec<Performer>,
    pub tags: BTreeSet<String>,
    pub utags: Vec<UTag>,
}

impl Event {
    /// Checks the event and everything it references for the fields that form
    /// natural keys, so nothing partially keyed ever reaches the store.
    pub fn validate(&self) -> Result<()> {
        if self.date.is_none() {
            return Err(ScraperError::InvalidEntity("event without date".into()));
        }
        match &self.venue {
            None => return Err(ScraperError::InvalidEntity("event without venue".into())),
            Some(venue) => venue.validate()?,
        }
        for performer in &self.performers {
            performer.validate()?;
        }
        Ok(())
    }

    /// The timestamp as stored in the `event.date` column
    pub fn date_key(&self) -> Option<String> {
        self.date.map(|d| format_db_date(&d))
    }
}

pub fn format_db_date<Tz: chrono::TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    date.format(DB_DATE_FORMAT).to_string()
}

pub fn parse_db_date(value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value, DB_DATE_FORMAT)
        .map_err(|e| ScraperError::Parse(format!("bad stored date '{}': {}", value, e)))
}

/// Core trait that all listing sources implement
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Source tag attached to every event this source emits
    fn name(&self) -> &str;

    /// Fetch the source and turn it into event drafts. Broken rows are logged
    /// and skipped; only a failed fetch or unreadable document is an error.
    async fn crawl(&self) -> Result<Vec<Event>>;
}
