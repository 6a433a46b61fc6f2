use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Id of the status record used as the global migration mutex
pub const LOCK_ID: &str = "$$MIGRATION-LOCK";

/// One row of the migration status collection: either an applied migration or the lock sentinel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatusRecord {
    /// Migration name, or `LOCK_ID` for the lock sentinel
    pub id: String,
    pub applied_on: DateTime<Utc>,
    /// Holder token; only set on the lock sentinel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl MigrationStatusRecord {
    pub fn applied(name: impl Into<String>) -> Self {
        Self {
            id: name.into(),
            applied_on: Utc::now(),
            uuid: None,
        }
    }

    pub fn lock(token: impl Into<String>) -> Self {
        Self {
            id: LOCK_ID.to_string(),
            applied_on: Utc::now(),
            uuid: Some(token.into()),
        }
    }
}

/// A one-time, ordered schema or data transformation
#[async_trait::async_trait]
pub trait Migration: Send + Sync {
    async fn migrate(&self) -> Result<()>;

    /// Skipped migrations are neither run nor recorded
    fn skip(&self) -> bool {
        false
    }

    /// Run without keeping the status record, so it runs again next time
    fn no_commit(&self) -> bool {
        false
    }

    fn desc(&self) -> &str {
        ""
    }
}
