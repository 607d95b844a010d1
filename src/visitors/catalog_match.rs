use super::Visitor;
use crate::db::Store;
use crate::error::Result;
use crate::types::Event;
use std::sync::Arc;
use tracing::debug;

/// Swaps draft performers for their stored record on an exact (name, genre)
/// hit, so already enriched performers skip the external lookup.
pub struct CatalogMatchVisitor {
    store: Arc<Store>,
}

impl CatalogMatchVisitor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Visitor for CatalogMatchVisitor {
    fn name(&self) -> &str {
        "catalog_match"
    }

    async fn visit(&self, event: &mut Event) -> Result<()> {
        for performer in event.performers.iter_mut().filter(|p| p.id.is_none()) {
            if let Some(stored) = self.store.find_performer(&performer.name, &performer.genre)? {
                debug!(performer = %performer.name, id = ?stored.id, "Matched performer in catalog");
                *performer = stored;
            }
        }
        Ok(())
    }
}
