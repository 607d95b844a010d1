use crate::constants::{
    DEFAULT_ACCEPT_THRESHOLD, DEFAULT_DATABASE_PATH, DEFAULT_EVENT_TYPE, DEFAULT_IMAGE_DIR,
    DEFAULT_INTERVAL_SECS, DEFAULT_LOG_DIR, DEFAULT_SEARCH_URL, DEFAULT_TIMEZONE,
    DEFAULT_USER_AGENT, RSS_KIND, TABLE_LISTING_KIND,
};
use crate::error::{Result, ScraperError};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process configuration, read once at startup from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Address for the Prometheus scrape endpoint, e.g. `0.0.0.0:9100`
    #[serde(default)]
    pub metrics_listen: Option<String>,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: default_search_url(),
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            user_agent: default_user_agent(),
        }
    }
}

/// One configured listing source
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// HTML page with one nested table per day
    TableListing {
        name: String,
        url: String,
        #[serde(default)]
        timezone: Option<String>,
    },
    /// RSS/Atom feed of a single venue
    Rss {
        name: String,
        url: String,
        venue: String,
        #[serde(default)]
        address: String,
        #[serde(default = "default_event_type")]
        event_type: String,
        #[serde(default)]
        timezone: Option<String>,
    },
}

impl SourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::TableListing { .. } => TABLE_LISTING_KIND,
            SourceConfig::Rss { .. } => RSS_KIND,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SourceConfig::TableListing { name, .. } | SourceConfig::Rss { name, .. } => name,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            SourceConfig::TableListing { url, .. } | SourceConfig::Rss { url, .. } => url,
        }
    }

    /// The source's own timezone override, if any
    pub fn timezone(&self) -> Option<&str> {
        match self {
            SourceConfig::TableListing { timezone, .. } | SourceConfig::Rss { timezone, .. } => {
                timezone.as_deref()
            }
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(ScraperError::Config("interval_secs must be positive".into()));
        }
        parse_timezone(&self.timezone)?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name().trim().is_empty() {
                return Err(ScraperError::Config("source with empty name".into()));
            }
            if source.url().trim().is_empty() {
                return Err(ScraperError::Config(format!(
                    "source '{}' has no url",
                    source.name()
                )));
            }
            if !seen.insert(source.name()) {
                return Err(ScraperError::Config(format!(
                    "duplicate source name '{}'",
                    source.name()
                )));
            }
            if let Some(tz) = source.timezone() {
                parse_timezone(tz)?;
            }
            if let SourceConfig::Rss { venue, .. } = source {
                if venue.trim().is_empty() {
                    return Err(ScraperError::Config(format!(
                        "rss source '{}' needs a venue",
                        source.name()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Timezone for a source: its own override or the global default
    pub fn source_timezone(&self, source: &SourceConfig) -> Result<Tz> {
        parse_timezone(source.timezone().unwrap_or(&self.timezone))
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| ScraperError::Config(format!("unknown timezone '{}': {}", name, e)))
}

fn default_database() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_PATH)
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_image_dir() -> PathBuf {
    PathBuf::from(DEFAULT_IMAGE_DIR)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

fn default_true() -> bool {
    true
}

fn default_search_url() -> String {
    DEFAULT_SEARCH_URL.to_string()
}

fn default_accept_threshold() -> usize {
    DEFAULT_ACCEPT_THRESHOLD
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_event_type() -> String {
    DEFAULT_EVENT_TYPE.to_string()
}
