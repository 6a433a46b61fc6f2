use anyhow::{Context, Result};
use log::warn;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};

use crate::model::{Id, MigrationStatusRecord, SchemaOverride};
use crate::store::traits::{MigrationStatusStore, OverrideStore};

const CREATE_MIGRATION_STATUS: &str = r#"
    CREATE TABLE IF NOT EXISTS migration_status (
        id TEXT PRIMARY KEY,
        applied_on TIMESTAMPTZ NOT NULL,
        uuid TEXT
    )
"#;

const CREATE_SCHEMA_OVERRIDES: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_overrides (
        position BIGSERIAL,
        id TEXT PRIMARY KEY,
        target_collection_id TEXT NOT NULL,
        match_spec JSONB,
        fields JSONB NOT NULL,
        source TEXT
    )
"#;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the tables this store reads and writes
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_MIGRATION_STATUS)
            .execute(&self.pool)
            .await
            .context("Failed to create migration_status table")?;
        sqlx::query(CREATE_SCHEMA_OVERRIDES)
            .execute(&self.pool)
            .await
            .context("Failed to create schema_overrides table")?;
        Ok(())
    }
}

fn status_from_row(row: &PgRow) -> Result<MigrationStatusRecord> {
    Ok(MigrationStatusRecord {
        id: row.try_get("id")?,
        applied_on: row.try_get("applied_on")?,
        uuid: row.try_get("uuid")?,
    })
}

fn override_from_row(row: &PgRow) -> Result<SchemaOverride> {
    decode_override(
        row.try_get("id")?,
        row.try_get("target_collection_id")?,
        row.try_get("match_spec")?,
        row.try_get("fields")?,
        row.try_get("source")?,
    )
}

fn decode_override(
    id: String,
    target_collection_id: String,
    match_spec: Option<serde_json::Value>,
    fields: serde_json::Value,
    source: Option<String>,
) -> Result<SchemaOverride> {
    Ok(SchemaOverride {
        match_spec: match_spec
            .map(serde_json::from_value)
            .transpose()
            .with_context(|| format!("Invalid match spec in override {}", id))?,
        fields: serde_json::from_value(fields)
            .with_context(|| format!("Invalid field tree in override {}", id))?,
        target_collection_id,
        source,
        id,
    })
}

/// Skip rows that fail to decode so one bad document does not hide the rest
fn keep_decodable(
    decoded: impl IntoIterator<Item = Result<SchemaOverride>>,
) -> Vec<SchemaOverride> {
    decoded
        .into_iter()
        .filter_map(|document| match document {
            Ok(document) => Some(document),
            Err(e) => {
                warn!("Skipping stored override: {:#}", e);
                None
            }
        })
        .collect()
}

#[async_trait::async_trait]
impl MigrationStatusStore for PostgresStore {
    async fn upsert_on_insert(&self, record: MigrationStatusRecord) -> Result<MigrationStatusRecord> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let row = sqlx::query(
            r#"
            INSERT INTO migration_status (id, applied_on, uuid)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET id = migration_status.id
            RETURNING id, applied_on, uuid
            "#,
        )
        .bind(&record.id)
        .bind(record.applied_on)
        .bind(&record.uuid)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert migration status")?;

        status_from_row(&row)
    }

    async fn get_status(&self, id: &str) -> Result<Option<MigrationStatusRecord>> {
        let row = sqlx::query("SELECT id, applied_on, uuid FROM migration_status WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch migration status")?;

        row.as_ref().map(status_from_row).transpose()
    }

    async fn insert_status(&self, record: MigrationStatusRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_status (id, applied_on, uuid)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                applied_on = EXCLUDED.applied_on,
                uuid = EXCLUDED.uuid
            "#,
        )
        .bind(&record.id)
        .bind(record.applied_on)
        .bind(&record.uuid)
        .execute(&self.pool)
        .await
        .context("Failed to write migration status")?;

        Ok(())
    }

    async fn delete_status(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM migration_status WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete migration status")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl OverrideStore for PostgresStore {
    async fn list_overrides(&self) -> Result<Vec<SchemaOverride>> {
        let rows = sqlx::query(
            "SELECT id, target_collection_id, match_spec, fields, source FROM schema_overrides ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list schema overrides")?;

        Ok(keep_decodable(rows.iter().map(override_from_row)))
    }

    async fn put_override(&self, schema_override: SchemaOverride) -> Result<()> {
        let match_spec = schema_override
            .match_spec
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let fields = serde_json::to_value(&schema_override.fields)?;

        sqlx::query(
            r#"
            INSERT INTO schema_overrides (id, target_collection_id, match_spec, fields, source)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                target_collection_id = EXCLUDED.target_collection_id,
                match_spec = EXCLUDED.match_spec,
                fields = EXCLUDED.fields,
                source = EXCLUDED.source
            "#,
        )
        .bind(&schema_override.id)
        .bind(&schema_override.target_collection_id)
        .bind(match_spec)
        .bind(fields)
        .bind(&schema_override.source)
        .execute(&self.pool)
        .await
        .context("Failed to upsert schema override")?;

        Ok(())
    }

    async fn delete_override(&self, id: &Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schema_overrides WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete schema override")?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_malformed_rows_are_skipped() {
        let good = decode_override(
            "ov-good".to_string(),
            "c-user".to_string(),
            Some(json!({ "eq": ["$.tenant", "acme"] })),
            json!({ "nickname": { "type": "string" } }),
            None,
        );
        let bad_match = decode_override(
            "ov-bad-match".to_string(),
            "c-user".to_string(),
            Some(json!({ "between": [1, 2] })),
            json!({}),
            None,
        );
        let bad_fields = decode_override(
            "ov-bad-fields".to_string(),
            "c-user".to_string(),
            None,
            json!({ "nickname": { "type": "blob" } }),
            None,
        );
        assert!(format!("{:#}", bad_match.as_ref().unwrap_err()).contains("ov-bad-match"));

        let kept = keep_decodable([bad_match, good, bad_fields]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "ov-good");
        assert!(kept[0].match_spec.is_some());
    }
}
