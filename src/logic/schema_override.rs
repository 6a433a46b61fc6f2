use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::logic::Registry;
use crate::model::{
    compile_fields, compile_match, link_fields, Collection, Field, FieldMap, Id, SchemaOverride,
};
use crate::store::{CompiledOverride, OverrideCache, OverrideStore};

/// Signals carried on the event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaEvent {
    /// Some override was written or deleted; every cache must be dropped
    OverridesChanged { id: Id },
}

/// Process-side end of the pub/sub channel used for override invalidation
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchemaEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many subscribers received the event
    pub fn publish(&self, event: SchemaEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchemaEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No field of that name existed
    Inserted,
    /// Both sides were objects; nested fields were merged into a copy
    Merged,
    /// Type mismatch or non-object field; the incoming field replaced the old one
    Replaced,
}

/// Merge `incoming` into `fields` under `name`.
/// The field already in the map is never modified; merged objects are copies.
pub fn merge_schema(fields: &mut FieldMap, name: &str, incoming: Arc<Field>) -> MergeOutcome {
    match fields.get(name).cloned() {
        None => {
            fields.insert(name.to_string(), incoming);
            MergeOutcome::Inserted
        }
        Some(existing) if existing.is_object() && incoming.is_object() => {
            let mut merged = Field::clone(&existing);
            let mut nested = merged.fields.clone();

            let mut children: Vec<(&String, &Arc<Field>)> = incoming.fields.iter().collect();
            children.sort_by(|a, b| a.0.cmp(b.0));
            for (child, field) in children {
                merge_schema(&mut nested, child, field.clone());
            }

            merged.fields = nested;
            fields.insert(name.to_string(), Arc::new(merged));
            MergeOutcome::Merged
        }
        Some(existing) => {
            // Last match wins. Whether this deserves a warning is still undecided.
            debug!(
                "field `{}` ({}) replaced by override field ({})",
                name, existing.data_type, incoming.data_type
            );
            fields.insert(name.to_string(), incoming);
            MergeOutcome::Replaced
        }
    }
}

/// Computes effective field maps from base collections plus stored overrides
pub struct SchemaOverrideEngine {
    store: Arc<dyn OverrideStore>,
    registry: Arc<Registry>,
    cache: OverrideCache,
    bus: EventBus,
    events: Mutex<broadcast::Receiver<SchemaEvent>>,
}

impl SchemaOverrideEngine {
    pub fn new(store: Arc<dyn OverrideStore>, registry: Arc<Registry>, bus: EventBus) -> Self {
        let events = Mutex::new(bus.subscribe());
        Self {
            store,
            registry,
            cache: OverrideCache::new(),
            bus,
            events,
        }
    }

    /// Effective fields of `collection` for `candidate`: the base fields with every
    /// matching override merged in, in storage order
    pub async fn fields_for(&self, collection: &Collection, candidate: &Value) -> Result<FieldMap> {
        let mut fields = collection
            .fields()
            .ok_or_else(|| anyhow!("Collection {} is not compiled", collection.def().name))?;

        let target = &collection.def().id;
        for compiled in self.overrides().await? {
            if &compiled.target_collection_id != target || !(compiled.predicate)(candidate) {
                continue;
            }
            for (name, field) in &compiled.fields {
                merge_schema(&mut fields, name, field.clone());
            }
        }

        Ok(fields)
    }

    /// Write an override and broadcast the invalidation, including to this engine
    pub async fn put_override(&self, schema_override: SchemaOverride) -> Result<()> {
        let id = schema_override.id.clone();
        self.store.put_override(schema_override).await?;
        self.bus.publish(SchemaEvent::OverridesChanged { id });
        Ok(())
    }

    pub async fn delete_override(&self, id: &Id) -> Result<bool> {
        let deleted = self.store.delete_override(id).await?;
        if deleted {
            self.bus.publish(SchemaEvent::OverridesChanged { id: id.clone() });
        }
        Ok(deleted)
    }

    /// Stored override documents, uncompiled, in storage order
    pub async fn list_overrides(&self) -> Result<Vec<SchemaOverride>> {
        self.store.list_overrides().await
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Drop the entire cache; the next read reloads every override
    pub async fn invalidate(&self) {
        self.cache.clear().await;
    }

    /// Number of full loads performed so far
    pub fn load_count(&self) -> u64 {
        self.cache.load_count()
    }

    /// Consume pending bus events; true if any asks for invalidation
    fn drain_events(&self) -> bool {
        let mut events = self.events.lock();
        let mut changed = false;
        loop {
            match events.try_recv() {
                Ok(SchemaEvent::OverridesChanged { id }) => {
                    debug!("override {} changed", id);
                    changed = true;
                }
                // Missed events could have been anything
                Err(TryRecvError::Lagged(_)) => changed = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        changed
    }

    async fn overrides(&self) -> Result<Vec<Arc<CompiledOverride>>> {
        if self.drain_events() {
            self.cache.clear().await;
        }

        if let Some(cached) = self.cache.get().await {
            return Ok(cached);
        }

        let documents = self
            .store
            .list_overrides()
            .await
            .context("Failed to load schema overrides")?;

        let mut complete = true;
        let mut compiled = Vec::with_capacity(documents.len());
        for document in &documents {
            let Some(target) = self.registry.collection(&document.target_collection_id) else {
                warn!(
                    "Override {} targets unknown collection {}; will retry",
                    document.id, document.target_collection_id
                );
                complete = false;
                continue;
            };

            match self.compile_override(document, &target) {
                Ok(Some(entry)) => compiled.push(Arc::new(entry)),
                Ok(None) => complete = false,
                Err(e) => warn!("Skipping override {}: {:#}", document.id, e),
            }
        }

        info!(
            "Loaded {} of {} schema overrides{}",
            compiled.len(),
            documents.len(),
            if complete { "" } else { " (incomplete)" }
        );

        self.cache.put(compiled.clone(), complete).await;
        Ok(compiled)
    }

    /// Compile one override. `Ok(None)` means a link target is not registered yet.
    fn compile_override(
        &self,
        document: &SchemaOverride,
        target: &Collection,
    ) -> Result<Option<CompiledOverride>> {
        let prefix = &target.def().name;
        let structural = compile_fields(prefix, &document.fields)?;
        let linked = match link_fields(prefix, &structural, self.registry.as_ref()) {
            Ok(linked) => linked,
            Err(reasons) => {
                warn!(
                    "Override {} has unresolved links; will retry: {}",
                    document.id,
                    reasons.join("; ")
                );
                return Ok(None);
            }
        };
        let predicate = compile_match(document.match_spec.as_ref())?;

        let mut fields: Vec<(String, Arc<Field>)> = linked.into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Some(CompiledOverride {
            id: document.id.clone(),
            target_collection_id: document.target_collection_id.clone(),
            predicate,
            fields,
        }))
    }
}
