use anyhow::Result;
use log::info;
use std::sync::Arc;

use crate::logic::{Registry, SchemaOverrideEngine};
use crate::model::{CollectionDef, DataType, FieldDef, MethodDef, Plugin, SchemaOverride, Stage};

/// Helper function to create CollectionDef with system audit info
fn create_system_collection(id: &str, name: &str, description: &str) -> CollectionDef {
    let mut def = CollectionDef::new(id, name);
    def.description = Some(description.to_string());
    def
}

/// Demo collections. `post` is listed before the `user` it links to.
pub fn demo_collections() -> Vec<CollectionDef> {
    let mut post = create_system_collection("c-post", "post", "Blog posts")
        .with_field("title", FieldDef { required: Some(true), ..FieldDef::new(DataType::String) })
        .with_field("author", FieldDef::link_to("user"))
        .with_field("tags", FieldDef::array_of(FieldDef::new(DataType::String)))
        .with_field(
            "status",
            FieldDef {
                values: Some(vec!["draft".into(), "published".into()]),
                ..FieldDef::new(DataType::String)
            },
        );
    post.methods.push(MethodDef {
        name: "publish".to_string(),
        description: Some("Move a draft to published".to_string()),
    });

    let mut user = create_system_collection("c-user", "user", "Registered users")
        .with_field("email", FieldDef { required: Some(true), ..FieldDef::new(DataType::String) })
        .with_field(
            "profile",
            FieldDef::object([
                ("avatarUrl", FieldDef::new(DataType::String)),
                ("joined", FieldDef::new(DataType::Date)),
            ]),
        )
        .with_field("teams", FieldDef::array_of(FieldDef::link_to("team")));
    user.enum_values.insert("role".to_string(), vec!["admin".into(), "member".into()]);

    let team = create_system_collection("c-team", "team", "Groups of users")
        .with_field("title", FieldDef::new(DataType::String))
        .with_field("owner", FieldDef::link_to("user"));

    let mut audit = create_system_collection("c-audit", "audit", "Internal change log")
        .with_field("at", FieldDef::new(DataType::Date))
        .with_field("payload", FieldDef::new(DataType::Any));
    audit.hidden = true;
    audit.internal = true;

    vec![post, user, team, audit]
}

/// Register the demo collections and a search plugin depending on them
pub fn register_demo_components(registry: &Registry) {
    for def in demo_collections() {
        registry.register_collection(def);
    }
    registry.register(Arc::new(
        Plugin::new("p-search", "search")
            .requires("post")
            .requires("user")
            .in_stages(&[Stage::Link, Stage::PostLink]),
    ));
}

/// Store a tenant-specific override of `user.profile` unless one already exists
pub async fn load_seed_data(engine: &SchemaOverrideEngine) -> Result<()> {
    let existing = engine.list_overrides().await?;
    if existing.iter().any(|o| o.id == "ov-acme-profile") {
        return Ok(());
    }

    let acme = serde_json::from_value(serde_json::json!({ "eq": ["$.tenant", "acme"] }))?;
    engine
        .put_override(
            SchemaOverride::new("ov-acme-profile", "c-user")
                .when(acme)
                .with_field(
                    "profile",
                    FieldDef::object([("nickname", FieldDef::new(DataType::String))]),
                ),
        )
        .await?;
    info!("Seeded demo schema override");
    Ok(())
}
