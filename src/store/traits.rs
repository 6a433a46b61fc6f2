use crate::model::{Id, MigrationStatusRecord, SchemaOverride};
use anyhow::Result;

/// Storage for migration status records, including the lock sentinel
#[async_trait::async_trait]
pub trait MigrationStatusStore: Send + Sync {
    /// Atomically insert `record` if no record with its id exists.
    /// Returns the stored record: the existing one unchanged, or `record` if it was inserted.
    /// Lock correctness depends on this being atomic across concurrent callers.
    async fn upsert_on_insert(&self, record: MigrationStatusRecord) -> Result<MigrationStatusRecord>;
    /// Point lookup by id
    async fn get_status(&self, id: &str) -> Result<Option<MigrationStatusRecord>>;
    /// Write a status record, replacing any record with the same id
    async fn insert_status(&self, record: MigrationStatusRecord) -> Result<()>;
    /// Delete by id; returns whether a record was removed
    async fn delete_status(&self, id: &str) -> Result<bool>;
}

/// Storage for schema override documents
#[async_trait::async_trait]
pub trait OverrideStore: Send + Sync {
    /// All overrides, in storage order
    async fn list_overrides(&self) -> Result<Vec<SchemaOverride>>;
    /// Create or replace an override; a replaced override keeps its storage position
    async fn put_override(&self, schema_override: SchemaOverride) -> Result<()>;
    async fn delete_override(&self, id: &Id) -> Result<bool>;
}

pub trait Store: MigrationStatusStore + OverrideStore + Send + Sync {}
impl<T: MigrationStatusStore + OverrideStore + Send + Sync> Store for T {}
