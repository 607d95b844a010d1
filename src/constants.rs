/// Source kinds accepted in the `[[sources]]` configuration list
pub const TABLE_LISTING_KIND: &str = "table_listing";
pub const RSS_KIND: &str = "rss";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_DATABASE_PATH: &str = "data/concerts.db";
pub const DEFAULT_IMAGE_DIR: &str = "data/images";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";
pub const DEFAULT_INTERVAL_SECS: u64 = 3600;

/// Event type used for feed entries that carry no category
pub const DEFAULT_EVENT_TYPE: &str = "Konzert";

pub const DEFAULT_SEARCH_URL: &str = "https://bandcamp.com/search";
pub const DEFAULT_USER_AGENT: &str = "concert_scraper/0.1";

/// Maximum accepted (edit distance + list rank) for a metadata candidate
pub const DEFAULT_ACCEPT_THRESHOLD: usize = 1;

/// Persisted event timestamp format: sortable, with milliseconds and UTC offset.
/// SQLite's date functions understand it, which the cleanup pass relies on.
pub const DB_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f%:z";

pub const RENDITION_ORIGINAL: &str = "original";

/// Thumbnail renditions written next to every mirrored image: (name, max edge in px)
pub const THUMBNAIL_RENDITIONS: &[(&str, u32)] = &[("thumb", 100), ("medium", 300)];

/// Link type stored in `performer_extra` for outbound performer links
pub const LINK_TYPE_RELATION: &str = "relation";
