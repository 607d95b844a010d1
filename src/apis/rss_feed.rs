use super::fetch_bytes;
use crate::error::Result;
use crate::normalize::{collapse_whitespace, guess_performers, html_to_text};
use crate::types::{Event, EventSource, Venue};
use chrono_tz::Tz;
use feed_rs::model::Entry;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// RSS/Atom feed of a single venue, one entry per event. The entry's
/// publication timestamp is the event start.
pub struct RssFeedSource {
    name: String,
    url: String,
    venue: Venue,
    event_type: String,
    tz: Tz,
    client: reqwest::Client,
}

impl RssFeedSource {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        venue: Venue,
        event_type: impl Into<String>,
        tz: Tz,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            venue,
            event_type: event_type.into(),
            tz,
            client: reqwest::Client::new(),
        }
    }

    pub fn parse_document(&self, payload: &[u8]) -> Result<Vec<Event>> {
        let feed = feed_rs::parser::parse(payload)?;
        let events: Vec<Event> = feed
            .entries
            .iter()
            .filter_map(|entry| self.entry_to_event(entry))
            .collect();
        Ok(events)
    }

    fn entry_to_event(&self, entry: &Entry) -> Option<Event> {
        let Some(published) = entry.published.or(entry.updated) else {
            warn!(source = %self.name, entry = %entry.id, "Skipping feed entry without date");
            return None;
        };
        let date = published.with_timezone(&self.tz).fixed_offset();

        let title = entry
            .title
            .as_ref()
            .map(|t| collapse_whitespace(&html_to_text(&t.content)))
            .unwrap_or_default();
        let body = entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
            .map(|html| html_to_text(&html))
            .unwrap_or_default();
        let description = [title.as_str(), body.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        if description.is_empty() {
            warn!(source = %self.name, entry = %entry.id, "Skipping empty feed entry");
            return None;
        }

        let tags: BTreeSet<String> = entry
            .categories
            .iter()
            .map(|c| collapse_whitespace(&c.term))
            .filter(|t| !t.is_empty())
            .collect();
        let kind = entry
            .categories
            .first()
            .map(|c| collapse_whitespace(c.label.as_deref().unwrap_or(&c.term)))
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.event_type.clone());

        Some(Event {
            venue: Some(self.venue.clone()),
            date: Some(date),
            kind,
            performers: guess_performers(&description),
            description,
            source: self.name.clone(),
            tags,
            ..Default::default()
        })
    }
}

#[async_trait::async_trait]
impl EventSource for RssFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn crawl(&self) -> Result<Vec<Event>> {
        let payload = fetch_bytes(&self.client, &self.url).await?;
        let events = self.parse_document(&payload)?;
        info!("Successfully parsed {} events from feed {}", events.len(), self.url);
        Ok(events)
    }
}
