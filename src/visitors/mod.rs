pub mod catalog_match;
pub mod metadata;

use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::images::LocalImageMirror;
use crate::types::Event;
use std::sync::Arc;
use tracing::{info, warn};

pub use catalog_match::CatalogMatchVisitor;
pub use metadata::{BandPageClient, MetadataService, MetadataVisitor};

/// A post-processing step that mutates an event draft in place before it is
/// persisted.
#[async_trait::async_trait]
pub trait Visitor: Send + Sync {
    fn name(&self) -> &str;

    async fn visit(&self, event: &mut Event) -> Result<()>;
}

/// Ordered visitors, applied one after another to each draft. A failing
/// visitor is logged and the chain moves on to the next one.
#[derive(Default, Clone)]
pub struct VisitorChain {
    visitors: Vec<Arc<dyn Visitor>>,
}

impl VisitorChain {
    pub fn new(visitors: Vec<Arc<dyn Visitor>>) -> Self {
        Self { visitors }
    }

    /// Catalog match first, then the external metadata lookup when enabled.
    pub fn from_config(config: &Config, store: Arc<Store>) -> Result<Self> {
        let mut chain = Self::default();
        chain.push(Arc::new(CatalogMatchVisitor::new(store)));

        let enrichment = &config.enrichment;
        if enrichment.enabled {
            let client = reqwest::Client::builder()
                .user_agent(enrichment.user_agent.clone())
                .build()?;
            chain.push(Arc::new(MetadataVisitor::new(
                Arc::new(BandPageClient::new(enrichment.search_url.clone(), client.clone())),
                Arc::new(LocalImageMirror::new(config.image_dir.clone(), client)),
                enrichment.accept_threshold,
            )));
        }

        info!(
            visitors = ?chain.names(),
            "Configured visitor chain"
        );
        Ok(chain)
    }

    pub fn push(&mut self, visitor: Arc<dyn Visitor>) {
        self.visitors.push(visitor);
    }

    /// Visitor names in application order
    pub fn names(&self) -> Vec<&str> {
        self.visitors.iter().map(|v| v.name()).collect()
    }

    pub async fn apply(&self, event: &mut Event) {
        for visitor in &self.visitors {
            if let Err(e) = visitor.visit(event).await {
                warn!(
                    visitor = visitor.name(),
                    source = %event.source,
                    error = %e,
                    "Visitor failed, continuing with draft as is"
                );
            }
        }
    }
}
