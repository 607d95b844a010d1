//! Text and date helpers shared by all sources.

use crate::error::{Result, ScraperError};
use crate::types::Performer;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::collections::BTreeSet;
use tracing::{debug, warn};

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:Montag|Dienstag|Mittwoch|Donnerstag|Freitag|Samstag|Sonntag),\s+(\d{2})\.\s+(Januar|Februar|März|April|Mai|Juni|Juli|August|September|Oktober|November|Dezember)\s+(\d{4})$",
    )
    .unwrap()
});

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2}):(\d{2})(?:\s*Uhr)?$").unwrap());

static BR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// `"Name" (Genre, ...)` with straight or German quotes
static PERFORMER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["„“]([^"„“”]*)["“”]\s*\(([^()]*)\)"#).unwrap()
});

/// `from Somewhere` / `aus Irgendwo` inside a genre clause
static HOME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[,;\s])(?:from|aus)\s+([^,;]+)").unwrap());

fn german_month(name: &str) -> Option<u32> {
    let month = match name {
        "Januar" => 1,
        "Februar" => 2,
        "März" => 3,
        "April" => 4,
        "Mai" => 5,
        "Juni" => 6,
        "Juli" => 7,
        "August" => 8,
        "September" => 9,
        "Oktober" => 10,
        "November" => 11,
        "Dezember" => 12,
        _ => return None,
    };
    Some(month)
}

/// Parses `Freitag, 02. September 2016`.
pub fn parse_german_date(text: &str) -> Result<NaiveDate> {
    let text = collapse_whitespace(text);
    let caps = DATE_RE
        .captures(&text)
        .ok_or_else(|| ScraperError::Parse(format!("not a listing date: '{}'", text)))?;

    let day: u32 = caps[1]
        .parse()
        .map_err(|_| ScraperError::Parse(format!("bad day in '{}'", text)))?;
    let month = german_month(&caps[2])
        .ok_or_else(|| ScraperError::Parse(format!("bad month in '{}'", text)))?;
    let year: i32 = caps[3]
        .parse()
        .map_err(|_| ScraperError::Parse(format!("bad year in '{}'", text)))?;

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| ScraperError::Parse(format!("impossible date '{}'", text)))
}

/// Parses `19:00` or `19:00 Uhr`.
pub fn parse_time(text: &str) -> Result<NaiveTime> {
    let text = collapse_whitespace(text);
    let caps = TIME_RE
        .captures(&text)
        .ok_or_else(|| ScraperError::Parse(format!("not a listing time: '{}'", text)))?;
    let hour: u32 = caps[1]
        .parse()
        .map_err(|_| ScraperError::Parse(format!("bad hour in '{}'", text)))?;
    let minute: u32 = caps[2]
        .parse()
        .map_err(|_| ScraperError::Parse(format!("bad minute in '{}'", text)))?;
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| ScraperError::Parse(format!("impossible time '{}'", text)))
}

/// Attaches a wall-clock date and time to the source's timezone.
pub fn localize(date: NaiveDate, time: NaiveTime, tz: Tz) -> Result<DateTime<FixedOffset>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|d| d.fixed_offset())
        .ok_or_else(|| ScraperError::Parse(format!("{} does not exist in {}", naive, tz)))
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Turns an HTML fragment into plain text. Line breaks survive as `\n`,
/// other whitespace is collapsed and empty lines are dropped.
pub fn html_to_text(fragment: &str) -> String {
    let with_newlines = BR_RE.replace_all(fragment, "\n");
    let parsed = Html::parse_fragment(&with_newlines);
    let text: String = parsed.root_element().text().collect();
    text.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts performers announced as `"Name" (Genre, aus Ort)` from free text.
///
/// The home clause is cut out of the genre and kept as the performer's home;
/// genre tokens and home together become the performer's tags.
pub fn guess_performers(description: &str) -> Vec<Performer> {
    let mut performers: Vec<Performer> = Vec::new();

    for caps in PERFORMER_RE.captures_iter(description) {
        let segments: Vec<&str> = caps
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .collect();
        if segments.len() != 2 {
            warn!(
                pattern = &caps[0],
                segments = segments.len(),
                "Skipping performer pattern with wrong number of segments"
            );
            continue;
        }
        let (name, genre_clause) = (segments[0], segments[1]);

        let mut home = String::new();
        let mut genre_rest = genre_clause.to_string();
        if let Some(home_caps) = HOME_RE.captures(genre_clause) {
            if let (Some(whole), Some(place)) = (home_caps.get(0), home_caps.get(1)) {
                home = place.as_str().trim().to_string();
                genre_rest.replace_range(whole.range(), "");
            }
        }

        let genres: Vec<String> = genre_rest
            .split(',')
            .map(collapse_whitespace)
            .filter(|g| !g.is_empty())
            .collect();
        if genres.is_empty() {
            warn!(pattern = &caps[0], "Skipping performer without genre");
            continue;
        }

        let mut tags: BTreeSet<String> = genres.iter().cloned().collect();
        if !home.is_empty() {
            tags.insert(home.clone());
        }

        let performer = Performer {
            name: collapse_whitespace(name),
            genre: genres.join(", "),
            home,
            tags,
            ..Default::default()
        };
        if performers
            .iter()
            .any(|p| p.name == performer.name && p.genre == performer.genre)
        {
            continue;
        }
        debug!(performer = %performer.name, genre = %performer.genre, "Guessed performer");
        performers.push(performer);
    }

    performers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_german_date_and_time_in_zone() {
        let date = parse_german_date("Freitag, 02. September 2016").unwrap();
        let time = parse_time("19:00").unwrap();
        let stamp = localize(date, time, chrono_tz::Europe::Berlin).unwrap();
        let in_zone = stamp.with_timezone(&chrono_tz::Europe::Berlin);
        assert_eq!(in_zone.format("%d-%m-%Y %H:%M").to_string(), "02-09-2016 19:00");
        assert_eq!(stamp.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_winter_dates_use_standard_offset() {
        let date = parse_german_date("Samstag, 03. Dezember 2016").unwrap();
        let stamp = localize(date, parse_time("20:30 Uhr").unwrap(), chrono_tz::Europe::Berlin)
            .unwrap();
        assert_eq!(stamp.offset().local_minus_utc(), 3600);
    }

    #[test]
    fn test_rejects_malformed_dates() {
        assert!(parse_german_date("Friday, 02. September 2016").is_err());
        assert!(parse_german_date("Freitag, 2. September 2016").is_err());
        assert!(parse_german_date("Freitag, 31. Februar 2016").is_err());
        assert!(parse_german_date("").is_err());
    }

    #[test]
    fn test_rejects_malformed_times() {
        assert!(parse_time("7pm").is_err());
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("19.00").is_err());
    }

    #[test]
    fn test_html_to_text_keeps_line_breaks() {
        let text = html_to_text("Jazzhaus: Konzert<br>Live &amp; laut<br/>  <i>mit</i>   Gästen ");
        assert_eq!(text, "Jazzhaus: Konzert\nLive & laut\nmit Gästen");
    }

    #[test]
    fn test_guess_performer_with_home() {
        let performers = guess_performers(r#"Band "Die Katze" (Punk, aus Berlin) spielt live."#);
        assert_eq!(performers.len(), 1);
        let katze = &performers[0];
        assert_eq!(katze.name, "Die Katze");
        assert!(katze.genre.contains("Punk"));
        assert!(!katze.genre.contains("aus"));
        assert_eq!(katze.home, "Berlin");
        assert!(katze.tags.contains("Punk"));
        assert!(katze.tags.contains("Berlin"));
    }

    #[test]
    fn test_guess_several_performers() {
        let text = r#"Doppelkonzert mit „Kid Kopphausen“ (Indie, Pop) und "The Bunnies" (Garage Rock from Leeds)."#;
        let performers = guess_performers(text);
        assert_eq!(performers.len(), 2);
        assert_eq!(performers[0].name, "Kid Kopphausen");
        assert_eq!(performers[0].genre, "Indie, Pop");
        assert!(performers[0].home.is_empty());
        assert_eq!(performers[1].name, "The Bunnies");
        assert_eq!(performers[1].genre, "Garage Rock");
        assert_eq!(performers[1].home, "Leeds");
    }

    #[test]
    fn test_broken_patterns_do_not_stop_the_scan() {
        let text = r#"Erst "" (Jazz), dann "Ohne Genre" (aus Köln), zuletzt "Trio Fatal" (Jazz)."#;
        let performers = guess_performers(text);
        assert_eq!(performers.len(), 1);
        assert_eq!(performers[0].name, "Trio Fatal");
    }

    #[test]
    fn test_no_patterns_no_performers() {
        assert!(guess_performers("Offene Bühne, Eintritt frei").is_empty());
    }
}
