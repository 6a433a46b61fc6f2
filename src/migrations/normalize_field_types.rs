use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

use crate::logic::SchemaOverrideEngine;
use crate::model::{DataType, FieldDef, Migration};

/// Drop parts of a definition that its type ignores, recursively.
/// Returns whether anything changed.
fn normalize_field(field: &mut FieldDef) -> bool {
    let mut changed = false;

    if field.data_type != DataType::Array && field.of.take().is_some() {
        changed = true;
    }
    if let Some(element) = field.of.as_mut() {
        changed |= normalize_field(element);
    }
    for nested in field.fields.values_mut() {
        changed |= normalize_field(nested);
    }

    changed
}

/// Rewrites stored overrides that carry an `of` on a non-array field.
/// Rewritten documents are stored with lowercase type names; legacy PascalCase
/// names in untouched documents keep working through the read aliases.
pub struct NormalizeFieldTypes {
    engine: Arc<SchemaOverrideEngine>,
}

impl NormalizeFieldTypes {
    pub fn new(engine: Arc<SchemaOverrideEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl Migration for NormalizeFieldTypes {
    async fn migrate(&self) -> Result<()> {
        let overrides = self
            .engine
            .list_overrides()
            .await
            .context("Failed to read schema overrides")?;

        let total = overrides.len();
        let mut trimmed = 0;
        for (i, mut schema_override) in overrides.into_iter().enumerate() {
            if (i + 1) % 10 == 0 || i + 1 == total {
                info!("Normalizing override {}/{}: {}", i + 1, total, schema_override.id);
            }

            let mut changed = false;
            for field in schema_override.fields.values_mut() {
                changed |= normalize_field(field);
            }
            if changed {
                trimmed += 1;
                self.engine.put_override(schema_override).await?;
            }
        }

        info!("Normalized {} overrides ({} trimmed)", total, trimmed);
        Ok(())
    }

    fn desc(&self) -> &str {
        "rewrite stored schema overrides in canonical form"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_field_drops_ignored_element() {
        let mut field = FieldDef::object([(
            "tags",
            FieldDef {
                of: Some(Box::new(FieldDef::new(DataType::String))),
                ..FieldDef::new(DataType::String)
            },
        )]);

        assert!(normalize_field(&mut field));
        assert!(field.fields["tags"].of.is_none());
        assert!(!normalize_field(&mut field));

        let mut array = FieldDef::array_of(FieldDef::new(DataType::String));
        assert!(!normalize_field(&mut array));
        assert!(array.of.is_some());
    }

    #[tokio::test]
    async fn test_only_changed_overrides_are_written() {
        use crate::logic::{EventBus, Registry};
        use crate::model::SchemaOverride;
        use crate::store::{MemoryStore, OverrideStore};

        let store = Arc::new(MemoryStore::new());
        store
            .put_override(SchemaOverride::new("ov-clean", "c-user").with_field("bio", FieldDef::new(DataType::String)))
            .await
            .unwrap();
        store
            .put_override(SchemaOverride::new("ov-stray", "c-user").with_field(
                "bio",
                FieldDef {
                    of: Some(Box::new(FieldDef::new(DataType::Number))),
                    ..FieldDef::new(DataType::String)
                },
            ))
            .await
            .unwrap();

        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let engine = Arc::new(SchemaOverrideEngine::new(store.clone(), Arc::new(Registry::new()), bus));

        NormalizeFieldTypes::new(engine).migrate().await.unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event, crate::logic::SchemaEvent::OverridesChanged { id: "ov-stray".to_string() });
        assert!(events.try_recv().is_err());

        let stored = store.list_overrides().await.unwrap();
        assert!(stored.iter().all(|o| o.fields["bio"].of.is_none()));
    }
}
