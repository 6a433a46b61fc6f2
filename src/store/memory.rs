use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::model::{Id, MigrationStatusRecord, SchemaOverride};
use crate::store::traits::{MigrationStatusStore, OverrideStore};

/// In-process store. Every operation takes one lock, which makes `upsert_on_insert`
/// atomic for all callers sharing the same instance.
#[derive(Debug, Default)]
pub struct MemoryStore {
    statuses: Mutex<HashMap<String, MigrationStatusRecord>>,
    /// Kept in insertion order
    overrides: Mutex<Vec<SchemaOverride>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every status record, sorted
    pub fn status_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.statuses.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait::async_trait]
impl MigrationStatusStore for MemoryStore {
    async fn upsert_on_insert(&self, record: MigrationStatusRecord) -> Result<MigrationStatusRecord> {
        let mut statuses = self.statuses.lock();
        Ok(statuses
            .entry(record.id.clone())
            .or_insert(record)
            .clone())
    }

    async fn get_status(&self, id: &str) -> Result<Option<MigrationStatusRecord>> {
        Ok(self.statuses.lock().get(id).cloned())
    }

    async fn insert_status(&self, record: MigrationStatusRecord) -> Result<()> {
        self.statuses.lock().insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete_status(&self, id: &str) -> Result<bool> {
        Ok(self.statuses.lock().remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl OverrideStore for MemoryStore {
    async fn list_overrides(&self) -> Result<Vec<SchemaOverride>> {
        Ok(self.overrides.lock().clone())
    }

    async fn put_override(&self, schema_override: SchemaOverride) -> Result<()> {
        let mut overrides = self.overrides.lock();
        match overrides.iter_mut().find(|o| o.id == schema_override.id) {
            Some(existing) => *existing = schema_override,
            None => overrides.push(schema_override),
        }
        Ok(())
    }

    async fn delete_override(&self, id: &Id) -> Result<bool> {
        let mut overrides = self.overrides.lock();
        let before = overrides.len();
        overrides.retain(|o| &o.id != id);
        Ok(overrides.len() != before)
    }
}
