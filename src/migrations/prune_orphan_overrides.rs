use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

use crate::logic::SchemaOverrideEngine;
use crate::model::Migration;

/// Deletes overrides whose target collection is not registered.
/// Does nothing while no collection is registered at all.
/// Never committed, so it runs on every start.
pub struct PruneOrphanOverrides {
    engine: Arc<SchemaOverrideEngine>,
}

impl PruneOrphanOverrides {
    pub fn new(engine: Arc<SchemaOverrideEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl Migration for PruneOrphanOverrides {
    async fn migrate(&self) -> Result<()> {
        let registry = self.engine.registry().clone();
        if registry.collections().is_empty() {
            info!("No collections registered; nothing to prune against");
            return Ok(());
        }

        let mut pruned = 0;

        for schema_override in self.engine.list_overrides().await? {
            if registry.collection(&schema_override.target_collection_id).is_some() {
                continue;
            }
            warn!(
                "Deleting override {}: collection {} is not registered",
                schema_override.id, schema_override.target_collection_id
            );
            if self.engine.delete_override(&schema_override.id).await? {
                pruned += 1;
            }
        }

        info!("Pruned {} orphan overrides", pruned);
        Ok(())
    }

    fn no_commit(&self) -> bool {
        true
    }

    fn desc(&self) -> &str {
        "delete overrides targeting unregistered collections"
    }
}
