use crate::error::{Result, ScraperError};
use ::metrics::{describe_counter, describe_histogram, Unit};
use std::net::SocketAddr;
use tracing::info;

/// Installs the Prometheus exporter with an HTTP scrape endpoint on `listen`.
pub fn init_metrics(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| ScraperError::Config(format!("bad metrics_listen '{}': {}", listen, e)))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ScraperError::Config(format!("failed to install exporter: {}", e)))?;

    describe_counter!(
        "concert_sources_crawled_total",
        "Source crawls per cycle, labelled by source and outcome"
    );
    describe_counter!(
        "concert_events_ingested_total",
        "Event ingestion attempts, labelled by source and outcome"
    );
    describe_counter!(
        "concert_events_soft_deleted_total",
        "Events flagged deleted by the cleanup pass"
    );
    describe_histogram!(
        "concert_cycle_duration_seconds",
        Unit::Seconds,
        "Wall time of a full crawl, ingest and cleanup cycle"
    );

    info!("Prometheus exporter listening on http://{}/metrics", addr);
    Ok(())
}
