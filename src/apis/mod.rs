pub mod rss_feed;
pub mod table_listing;

use crate::config::{Config, SourceConfig};
use crate::error::Result;
use crate::types::EventSource;
use std::sync::Arc;
use tracing::debug;

pub use rss_feed::RssFeedSource;
pub use table_listing::TableListingSource;

/// Builds a listing source from its configuration entry
pub fn create_source(config: &Config, source: &SourceConfig) -> Result<Arc<dyn EventSource>> {
    let tz = config.source_timezone(source)?;
    let built: Arc<dyn EventSource> = match source {
        SourceConfig::TableListing { name, url, .. } => {
            Arc::new(TableListingSource::new(name.clone(), url.clone(), tz))
        }
        SourceConfig::Rss {
            name,
            url,
            venue,
            address,
            event_type,
            ..
        } => Arc::new(RssFeedSource::new(
            name.clone(),
            url.clone(),
            crate::types::Venue::new(venue.clone(), address.clone()),
            event_type.clone(),
            tz,
        )),
    };
    debug!(source = %source.name(), %tz, "Configured source");
    Ok(built)
}

/// Builds every configured source, in configuration order
pub fn create_sources(config: &Config) -> Result<Vec<Arc<dyn EventSource>>> {
    config
        .sources
        .iter()
        .map(|source| create_source(config, source))
        .collect()
}

/// GET a document; non-2xx answers count as transport failures.
pub(crate) async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    debug!(url, bytes = bytes.len(), "Fetched document");
    Ok(bytes.to_vec())
}

pub(crate) async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let bytes = fetch_bytes(client, url).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
