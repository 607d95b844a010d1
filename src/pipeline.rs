use crate::db::Store;
use crate::error::{Result, ScraperError};
use crate::resolver::event_must_exist;
use crate::types::{Event, EventSource};
use crate::visitors::VisitorChain;
use chrono::{DateTime, Utc};
use ::metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

/// Outcome of one source within a cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub crawled: usize,
    pub ingested: usize,
    pub failed: usize,
    /// Set when the crawl itself failed and nothing was ingested
    pub error: Option<String>,
}

/// Result of a complete crawl → ingest → cleanup cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
    pub sources: Vec<SourceReport>,
    pub soft_deleted: usize,
}

impl CycleReport {
    pub fn ingested(&self) -> usize {
        self.sources.iter().map(|s| s.ingested).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.iter().map(|s| s.failed).sum()
    }
}

/// Takes one draft through the visitors and into the store.
pub struct Ingestor {
    store: Arc<Store>,
    visitors: VisitorChain,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, visitors: VisitorChain) -> Self {
        Self { store, visitors }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Validates, enriches and persists one event in its own transaction.
    /// Returns the event id; on error nothing of this event is written.
    #[instrument(skip(self, event), fields(source = %event.source))]
    pub async fn ingest(&self, mut event: Event) -> Result<i64> {
        event.validate()?;
        self.visitors.apply(&mut event).await;
        self.store.transaction(|tx| event_must_exist(tx, &mut event))
    }
}

/// Runs every source in parallel, ingests their events one at a time, then
/// soft-deletes past events.
pub struct Orchestrator {
    sources: Vec<Arc<dyn EventSource>>,
    ingestor: Ingestor,
    interval: Duration,
}

impl Orchestrator {
    pub fn new(sources: Vec<Arc<dyn EventSource>>, ingestor: Ingestor, interval: Duration) -> Self {
        Self {
            sources,
            ingestor,
            interval,
        }
    }

    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let timer = Instant::now();

        let crawled = self.crawl_all().await;

        let mut reports = Vec::with_capacity(self.sources.len());
        for (source, outcome) in self.sources.iter().zip(crawled) {
            reports.push(self.ingest_source(source.name(), outcome).await);
        }

        let soft_deleted = self.cleanup();

        let elapsed = timer.elapsed();
        histogram!("concert_cycle_duration_seconds").record(elapsed.as_secs_f64());

        let report = CycleReport {
            started_at,
            duration_ms: elapsed.as_millis(),
            sources: reports,
            soft_deleted,
        };
        info!(
            ingested = report.ingested(),
            failed = report.failed(),
            soft_deleted,
            duration_ms = report.duration_ms,
            "Cycle finished"
        );
        report
    }

    /// Cycles forever, sleeping the configured interval after each cleanup.
    pub async fn run_forever(&self) {
        loop {
            self.run_cycle().await;
            info!("Sleeping {}s until next cycle", self.interval.as_secs());
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Soft-delete pass on its own; a failure is logged and counts as zero.
    pub fn cleanup(&self) -> usize {
        match self.ingestor.store().cleanup(Utc::now()) {
            Ok(flagged) => {
                counter!("concert_events_soft_deleted_total").increment(flagged as u64);
                flagged
            }
            Err(e) => {
                error!(error = %e, "Cleanup failed");
                0
            }
        }
    }

    /// Fans out one task per source and waits for all of them. Results come
    /// back in source order.
    async fn crawl_all(&self) -> Vec<Result<Vec<Event>>> {
        let mut tasks = JoinSet::new();
        for (index, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            tasks.spawn(async move { (index, source.crawl().await) });
        }

        let mut slots: Vec<Option<Result<Vec<Event>>>> =
            (0..self.sources.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!(error = %e, "Crawl task aborted"),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(ScraperError::Api {
                        message: "crawl task aborted".into(),
                    })
                })
            })
            .collect()
    }

    async fn ingest_source(&self, name: &str, outcome: Result<Vec<Event>>) -> SourceReport {
        let mut report = SourceReport {
            source: name.to_string(),
            ..Default::default()
        };

        let events = match outcome {
            Ok(events) => {
                counter!("concert_sources_crawled_total", "source" => name.to_string(), "outcome" => "ok")
                    .increment(1);
                events
            }
            Err(e) => {
                counter!("concert_sources_crawled_total", "source" => name.to_string(), "outcome" => "error")
                    .increment(1);
                error!(source = name, error = %e, "Source failed, skipping it this cycle");
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.crawled = events.len();

        for mut event in events {
            event.source = name.to_string();
            let date = event.date_key().unwrap_or_default();
            match self.ingestor.ingest(event).await {
                Ok(_) => {
                    report.ingested += 1;
                    counter!("concert_events_ingested_total", "source" => name.to_string(), "outcome" => "ok")
                        .increment(1);
                }
                Err(e) => {
                    report.failed += 1;
                    counter!("concert_events_ingested_total", "source" => name.to_string(), "outcome" => "error")
                        .increment(1);
                    warn!(source = name, %date, error = %e, "Dropped event");
                }
            }
        }

        info!(
            source = name,
            crawled = report.crawled,
            ingested = report.ingested,
            failed = report.failed,
            "Source ingested"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Venue;
    use chrono::{FixedOffset, TimeZone};

    struct Fixed(Vec<Event>);

    #[async_trait::async_trait]
    impl EventSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn crawl(&self) -> Result<Vec<Event>> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    #[async_trait::async_trait]
    impl EventSource for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn crawl(&self) -> Result<Vec<Event>> {
            Err(ScraperError::Parse("no listing table".into()))
        }
    }

    fn event_on(year: i32) -> Event {
        Event {
            venue: Some(Venue::new("Waldsee", "")),
            date: Some(
                FixedOffset::east_opt(3600)
                    .unwrap()
                    .with_ymd_and_hms(year, 5, 1, 20, 0, 0)
                    .unwrap(),
            ),
            kind: "Konzert".into(),
            source: "whatever".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cycle_isolates_failing_source() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(
            vec![Arc::new(Down), Arc::new(Fixed(vec![event_on(2040), event_on(2041)]))],
            Ingestor::new(store.clone(), VisitorChain::default()),
            Duration::from_secs(60),
        );

        let report = orchestrator.run_cycle().await;

        assert_eq!(report.sources[0].source, "down");
        assert!(report.sources[0].error.is_some());
        assert_eq!(report.sources[1].ingested, 2);
        assert_eq!(report.ingested(), 2);
        assert_eq!(store.count_rows("event").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_source_tag_is_stamped_and_past_events_soft_deleted() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(
            vec![Arc::new(Fixed(vec![event_on(2001), event_on(2040)]))],
            Ingestor::new(store.clone(), VisitorChain::default()),
            Duration::from_secs(60),
        );

        let report = orchestrator.run_cycle().await;
        assert_eq!(report.soft_deleted, 1);

        let (_, deleted) = store.event_status(1).unwrap().unwrap();
        assert!(deleted);
        let sources: i64 = store
            .transaction(|tx| {
                Ok(tx.query_row(
                    "SELECT COUNT(*) FROM event WHERE source = 'fixed'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(sources, 2);
    }

    #[tokio::test]
    async fn test_invalid_event_is_counted_not_fatal() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut broken = event_on(2040);
        broken.venue = None;
        let orchestrator = Orchestrator::new(
            vec![Arc::new(Fixed(vec![broken, event_on(2041)]))],
            Ingestor::new(store.clone(), VisitorChain::default()),
            Duration::from_secs(60),
        );

        let report = orchestrator.run_cycle().await;
        assert_eq!(report.sources[0].crawled, 2);
        assert_eq!(report.sources[0].failed, 1);
        assert_eq!(report.sources[0].ingested, 1);
    }
}
