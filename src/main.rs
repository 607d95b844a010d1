use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use concert_scraper::apis::create_sources;
use concert_scraper::config::Config;
use concert_scraper::constants::DEFAULT_CONFIG_PATH;
use concert_scraper::db::Store;
use concert_scraper::logging;
use concert_scraper::metrics::init_metrics;
use concert_scraper::pipeline::{Ingestor, Orchestrator};
use concert_scraper::visitors::VisitorChain;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "concert_scraper")]
#[command(about = "Crawls concert listings into a local event store")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl, ingest and clean up on the configured interval, forever
    Run,
    /// Run a single cycle and print its report as JSON
    Once,
    /// Only soft-delete events that are already over
    Cleanup,
    /// List the configured sources
    Sources,
}

fn build_orchestrator(config: &Config, store: Arc<Store>) -> anyhow::Result<Orchestrator> {
    let sources = create_sources(config).context("Failed to set up sources")?;
    let visitors =
        VisitorChain::from_config(config, store.clone()).context("Failed to set up visitors")?;
    Ok(Orchestrator::new(
        sources,
        Ingestor::new(store, visitors),
        config.interval(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    if let Commands::Sources = cli.command {
        for source in &config.sources {
            println!("{}\t{}\t{}", source.name(), source.kind(), source.url());
        }
        return Ok(());
    }

    let _guard = logging::init_logging(&config.log_dir);
    if let Some(listen) = &config.metrics_listen {
        init_metrics(listen)?;
    }

    let store = Arc::new(
        Store::open(&config.database)
            .with_context(|| format!("Failed to open store {}", config.database.display()))?,
    );

    match cli.command {
        Commands::Run => {
            info!(
                sources = config.sources.len(),
                interval_secs = config.interval_secs,
                "Starting concert scraper"
            );
            build_orchestrator(&config, store)?.run_forever().await;
        }
        Commands::Once => {
            let report = build_orchestrator(&config, store)?.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Cleanup => {
            let flagged = store.cleanup(Utc::now())?;
            println!("Soft-deleted {} past events", flagged);
        }
        Commands::Sources => {}
    }

    Ok(())
}
