pub mod config;
pub mod context;
pub mod logic;
pub mod migrations;
pub mod model;
pub mod seed;
pub mod store;

pub use context::ControlPlane;

// Export logic types
pub use logic::{
    merge_schema, BootReport, DeadlockError, EventBus, MergeOutcome, MigrationLoader,
    MigrationOutcome, MigrationRegistry, MigrationRunner, Registry, RunReport, SchemaEvent,
    SchemaOverrideEngine, StageResolver,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_demo_collections_boot_and_link() {
        let plane = ControlPlane::new(Arc::new(MemoryStore::new()), &config::AppConfig::default());
        seed::register_demo_components(&plane.registry);

        let reports = plane.boot().await.unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.passes >= 1));

        let post = plane.registry.collection_by_name("post").unwrap();
        assert_eq!(post.completed_stage(), Some(Stage::PostLink));
        let author = post.field("author").unwrap();
        assert_eq!(
            author.link.as_ref().unwrap().collection_id.as_deref(),
            Some("c-user")
        );

        let user = plane.registry.collection_by_name("user").unwrap();
        let teams = user.field("teams").unwrap();
        let element = teams.of.as_ref().unwrap();
        assert_eq!(
            element.link.as_ref().unwrap().collection_id.as_deref(),
            Some("c-team")
        );
    }

    #[tokio::test]
    async fn test_seed_override_applies_per_tenant() {
        let plane = ControlPlane::new(Arc::new(MemoryStore::new()), &config::AppConfig::default());
        seed::register_demo_components(&plane.registry);
        plane.boot().await.unwrap();
        seed::load_seed_data(&plane.overrides).await.unwrap();
        // Seeding twice is a no-op
        seed::load_seed_data(&plane.overrides).await.unwrap();
        assert_eq!(plane.overrides.list_overrides().await.unwrap().len(), 1);

        let acme = plane.fields_for("user", &json!({ "tenant": "acme" })).await.unwrap();
        assert!(acme["profile"].fields.contains_key("nickname"));
        assert!(acme["profile"].fields.contains_key("avatarUrl"));

        let other = plane.fields_for("user", &json!({ "tenant": "globex" })).await.unwrap();
        assert!(!other["profile"].fields.contains_key("nickname"));

        assert!(plane.fields_for("nope", &json!({})).await.is_err());
    }
}
