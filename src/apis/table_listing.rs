use super::fetch_text;
use crate::error::{Result, ScraperError};
use crate::normalize::{
    collapse_whitespace, guess_performers, html_to_text, localize, parse_german_date, parse_time,
};
use crate::types::{Event, EventSource, Venue};
use chrono::NaiveDate;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};

static OUTER_TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").unwrap());
static BLOCK_TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table table").unwrap());
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static BOLD: Lazy<Selector> = Lazy::new(|| Selector::parse("b").unwrap());
static BOLD_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("b a[title]").unwrap());
static FIRST_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());

/// Date state of one listing block
#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockDate {
    Unseen,
    Parsed(NaiveDate),
    Failed,
}

/// Listings page laid out as one nested table per day: the first row holds
/// the date, every further row a time cell and a body cell.
pub struct TableListingSource {
    name: String,
    url: String,
    tz: Tz,
    client: reqwest::Client,
}

impl TableListingSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, tz: Tz) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            tz,
            client: reqwest::Client::new(),
        }
    }

    /// Turns a fetched listings page into event drafts.
    pub fn parse_document(&self, html: &str) -> Result<Vec<Event>> {
        let document = Html::parse_document(html);
        if document.select(&OUTER_TABLE).next().is_none() {
            return Err(ScraperError::Parse(format!(
                "{}: no listing table in document",
                self.name
            )));
        }

        let mut events = Vec::new();
        for (index, block) in document.select(&BLOCK_TABLE).enumerate() {
            let parsed = self.parse_block(&block);
            debug!(block = index, events = parsed.len(), "Parsed listing block");
            events.extend(parsed);
        }

        if events.is_empty() {
            warn!(source = %self.name, "No events found - the page structure may have changed");
        }
        Ok(events)
    }

    fn parse_block(&self, block: &ElementRef) -> Vec<Event> {
        let mut events = Vec::new();
        let mut date = BlockDate::Unseen;

        for row in block.select(&ROW) {
            let cells: Vec<ElementRef> = row.select(&CELL).collect();
            if cells.is_empty() {
                continue;
            }

            match date {
                BlockDate::Unseen => {
                    let text: String = cells.iter().flat_map(|c| c.text()).collect();
                    date = match parse_german_date(&text) {
                        Ok(day) => BlockDate::Parsed(day),
                        Err(e) => {
                            warn!(source = %self.name, error = %e, "Skipping block with malformed date");
                            BlockDate::Failed
                        }
                    };
                }
                BlockDate::Parsed(day) => {
                    if let Some(event) = self.parse_row(day, &cells) {
                        events.push(event);
                    }
                }
                BlockDate::Failed => break,
            }
        }

        events
    }

    fn parse_row(&self, day: NaiveDate, cells: &[ElementRef]) -> Option<Event> {
        if cells.len() < 2 {
            warn!(source = %self.name, cells = cells.len(), "Skipping row without time and body");
            return None;
        }

        let time_text: String = cells[0].text().collect();
        let time = match parse_time(&time_text) {
            Ok(t) => t,
            Err(e) => {
                warn!(source = %self.name, error = %e, "Skipping row with malformed time");
                return None;
            }
        };
        let date = match localize(day, time, self.tz) {
            Ok(d) => d,
            Err(e) => {
                warn!(source = %self.name, error = %e, "Skipping row with nonexistent local time");
                return None;
            }
        };

        let body = cells[1];
        let body_html = body.inner_html();
        let (title_html, rest_html) = match FIRST_BREAK.find(&body_html) {
            Some(m) => (&body_html[..m.start()], &body_html[m.end()..]),
            None => (body_html.as_str(), ""),
        };

        let title = collapse_whitespace(&html_to_text(title_html));
        let segments: Vec<&str> = title.split(':').map(str::trim).collect();
        if segments.len() != 2 || segments[1].is_empty() {
            warn!(source = %self.name, title = %title, "Skipping row with malformed title line");
            return None;
        }

        let venue_name = body
            .select(&BOLD)
            .next()
            .map(|b| collapse_whitespace(&b.text().collect::<String>()))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| segments[0].to_string());
        let address = body
            .select(&BOLD_LINK)
            .next()
            .and_then(|a| a.value().attr("title"))
            .map(collapse_whitespace)
            .unwrap_or_default();

        let description = html_to_text(rest_html);
        let performers = guess_performers(&description);

        Some(Event {
            venue: Some(Venue::new(venue_name, address)),
            date: Some(date),
            kind: segments[1].to_string(),
            description,
            source: self.name.clone(),
            performers,
            ..Default::default()
        })
    }
}

#[async_trait::async_trait]
impl EventSource for TableListingSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn crawl(&self) -> Result<Vec<Event>> {
        let html = fetch_text(&self.client, &self.url).await?;
        let events = self.parse_document(&html)?;
        info!("Successfully parsed {} events from {}", events.len(), self.url);
        Ok(events)
    }
}
