use anyhow::{anyhow, Result};
use log::info;
use serde_json::Value;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::logic::{
    BootReport, DeadlockError, EventBus, MigrationLoader, MigrationRunner, Registry, RunReport,
    SchemaOverrideEngine, StageResolver,
};
use crate::migrations::builtin_migrations;
use crate::model::FieldMap;
use crate::store::Store;

/// Everything that would otherwise be process-wide state, in one constructible value
pub struct ControlPlane {
    pub registry: Arc<Registry>,
    pub resolver: StageResolver,
    pub overrides: Arc<SchemaOverrideEngine>,
    pub migrations: MigrationRunner,
    bus: EventBus,
    auto_migrate: bool,
}

impl ControlPlane {
    /// Control plane running the built-in migrations in the configured order
    pub fn new<S: Store + 'static>(store: Arc<S>, config: &AppConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let bus = EventBus::default();
        let overrides = Arc::new(SchemaOverrideEngine::new(
            store.clone(),
            registry.clone(),
            bus.clone(),
        ));
        let loader = Arc::new(builtin_migrations(&overrides));
        Self::assemble(store, config, registry, bus, overrides, loader)
    }

    /// Control plane with a caller-provided migration loader
    pub fn with_loader<S: Store + 'static>(
        store: Arc<S>,
        config: &AppConfig,
        loader: Arc<dyn MigrationLoader>,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let bus = EventBus::default();
        let overrides = Arc::new(SchemaOverrideEngine::new(
            store.clone(),
            registry.clone(),
            bus.clone(),
        ));
        Self::assemble(store, config, registry, bus, overrides, loader)
    }

    fn assemble<S: Store + 'static>(
        store: Arc<S>,
        config: &AppConfig,
        registry: Arc<Registry>,
        bus: EventBus,
        overrides: Arc<SchemaOverrideEngine>,
        loader: Arc<dyn MigrationLoader>,
    ) -> Self {
        let migrations = MigrationRunner::new(store, loader, config.migrations.order.clone())
            .with_poll_interval(config.lock_poll_interval());

        Self {
            registry,
            resolver: StageResolver::with_max_passes(config.bootstrap.max_passes),
            overrides,
            migrations,
            bus,
            auto_migrate: config.migrations.migrate,
        }
    }

    /// Bus carrying override invalidations; bridge it to other processes
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run every boot stage over the registered components
    pub async fn boot(&self) -> Result<Vec<BootReport>, DeadlockError> {
        self.resolver.boot_all(&self.registry).await
    }

    /// Boot, then run migrations when auto-run is configured.
    /// A deadlocked boot aborts startup; migration problems only show up in the log.
    pub async fn start(&self) -> Result<()> {
        let reports = self.boot().await?;
        info!(
            "Bootstrap complete in {} passes",
            reports.iter().map(|r| r.passes).sum::<u32>()
        );

        if self.auto_migrate {
            self.migrations.run().await;
        }
        Ok(())
    }

    pub async fn run_migrations(&self) -> RunReport {
        self.migrations.run().await
    }

    /// Effective fields of the collection named `collection` for `candidate`
    pub async fn fields_for(&self, collection: &str, candidate: &Value) -> Result<FieldMap> {
        let target = self
            .registry
            .collection_by_name(collection)
            .ok_or_else(|| anyhow!("Collection not found: {}", collection))?;
        self.overrides.fields_for(&target, candidate).await
    }

    /// Clear the satisfied set, the override cache and the waiting flag
    pub async fn reset(&self) {
        self.resolver.reset();
        self.overrides.invalidate().await;
        self.migrations.reset();
    }
}
