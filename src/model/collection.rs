use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::model::{
    compile_fields, link_fields, Catalog, Component, ComponentKind, Field, FieldDef, FieldMap, Id,
    Readiness, Stage,
};

/// Default user for legacy definitions
fn default_user() -> String {
    "legacy-user".to_string()
}

/// Default timestamp for legacy definitions
fn default_timestamp() -> DateTime<Utc> {
    // Use Unix epoch as default for legacy data
    DateTime::from_timestamp(0, 0).unwrap_or_else(Utc::now)
}

/// A method exposed on documents of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Represents a collection definition
/// Each collection defines the field tree its documents follow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDef {
    /// Unique identifier for this collection
    pub id: Id,

    /// Name of the collection (e.g., "user", "post"), the name link fields refer to
    pub name: String,

    /// Root field tree
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,

    /// Named enumerations, e.g. "role" -> ["admin", "member"]
    #[serde(default, rename = "enum", skip_serializing_if = "HashMap::is_empty")]
    pub enum_values: HashMap<String, Vec<Value>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<MethodDef>,

    /// Hidden collections are left out of client listings
    #[serde(default)]
    pub hidden: bool,

    /// Internal collections are only reachable from server code
    #[serde(default)]
    pub internal: bool,

    pub description: Option<String>,

    #[serde(default = "default_user")]
    pub created_by: String,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl CollectionDef {
    pub fn new(id: impl Into<Id>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fields: BTreeMap::new(),
            enum_values: HashMap::new(),
            methods: Vec::new(),
            hidden: false,
            internal: false,
            description: None,
            created_by: "system".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldDef) -> Self {
        self.fields.insert(name.into(), field);
        self
    }
}

#[derive(Debug, Default)]
struct CompiledState {
    fields: Option<FieldMap>,
    completed: Option<Stage>,
}

/// Runtime collection, compiled and linked by the stage resolver
#[derive(Debug)]
pub struct Collection {
    def: CollectionDef,
    state: RwLock<CompiledState>,
}

impl Collection {
    pub fn new(def: CollectionDef) -> Self {
        Self {
            def,
            state: RwLock::new(CompiledState::default()),
        }
    }

    pub fn def(&self) -> &CollectionDef {
        &self.def
    }

    /// Compiled root fields, once the compile stage has run
    pub fn fields(&self) -> Option<FieldMap> {
        self.state.read().fields.clone()
    }

    pub fn field(&self, name: &str) -> Option<Arc<Field>> {
        self.state
            .read()
            .fields
            .as_ref()
            .and_then(|fields| fields.get(name).cloned())
    }

    pub fn completed_stage(&self) -> Option<Stage> {
        self.state.read().completed
    }

    /// Drop compiled state; the next compile stage rebuilds every field
    pub fn recompile(&self) {
        *self.state.write() = CompiledState::default();
    }

    fn compile(&self) -> Readiness {
        match compile_fields(&self.def.name, &self.def.fields) {
            Ok(fields) => {
                let mut state = self.state.write();
                state.fields = Some(fields);
                state.completed = Some(Stage::Compile);
                Readiness::Ready
            }
            Err(e) => Readiness::pending(e.to_string()),
        }
    }

    fn link(&self, catalog: &dyn Catalog) -> Readiness {
        let Some(fields) = self.fields() else {
            return Readiness::pending(format!("collection `{}` is not compiled", self.def.name));
        };

        match link_fields(&self.def.name, &fields, catalog) {
            Ok(linked) => {
                let mut state = self.state.write();
                state.fields = Some(linked);
                state.completed = Some(Stage::Link);
                Readiness::Ready
            }
            Err(reasons) => Readiness::Pending(reasons),
        }
    }

    fn post_link(&self, catalog: &dyn Catalog) -> Readiness {
        let Some(fields) = self.fields() else {
            return Readiness::pending(format!("collection `{}` is not compiled", self.def.name));
        };

        let mut waiting_on: Vec<String> = fields
            .values()
            .flat_map(|field| {
                field
                    .link_targets()
                    .into_iter()
                    .map(|target| target.collection.clone())
                    .collect::<Vec<_>>()
            })
            .filter(|target| {
                target != &self.def.name
                    && catalog
                        .completed_stage(target)
                        .map_or(true, |stage| stage < Stage::Link)
            })
            .collect();
        waiting_on.sort();
        waiting_on.dedup();

        if !waiting_on.is_empty() {
            return Readiness::Pending(
                waiting_on
                    .into_iter()
                    .map(|target| {
                        format!(
                            "collection `{}` waits for `{}` to finish linking",
                            self.def.name, target
                        )
                    })
                    .collect(),
            );
        }

        self.state.write().completed = Some(Stage::PostLink);
        Readiness::Ready
    }
}

#[async_trait::async_trait]
impl Component for Collection {
    fn id(&self) -> &str {
        &self.def.id
    }

    fn name(&self) -> &str {
        &self.def.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Collection
    }

    async fn boot(&self, stage: Stage, _pass: u32, catalog: &dyn Catalog) -> Readiness {
        match stage {
            Stage::Compile => self.compile(),
            Stage::Link => self.link(catalog),
            Stage::PostLink => self.post_link(catalog),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataType;

    struct NoCollections;

    impl Catalog for NoCollections {
        fn resolve_link(&self, _name: &str) -> Option<Id> {
            None
        }

        fn completed_stage(&self, _name: &str) -> Option<Stage> {
            None
        }
    }

    #[tokio::test]
    async fn test_collection_compile_then_link() {
        let post = Collection::new(
            CollectionDef::new("c-post", "post")
                .with_field("title", FieldDef::new(DataType::String))
                .with_field("author", FieldDef::link_to("user")),
        );

        assert!(post.fields().is_none());
        assert!(post.boot(Stage::Compile, 1, &NoCollections).await.is_ready());
        assert_eq!(post.completed_stage(), Some(Stage::Compile));

        let compiled_title = post.field("title").unwrap();

        match post.boot(Stage::Link, 1, &NoCollections).await {
            Readiness::Pending(reasons) => assert_eq!(
                reasons,
                vec!["field `post.author` links to unknown collection `user`".to_string()]
            ),
            Readiness::Ready => panic!("link should wait for `user`"),
        }

        // A failed link keeps the compiled fields untouched
        assert!(Arc::ptr_eq(&compiled_title, &post.field("title").unwrap()));
        assert_eq!(post.completed_stage(), Some(Stage::Compile));
    }

    #[tokio::test]
    async fn test_recompile_discards_state() {
        let user = Collection::new(
            CollectionDef::new("c-user", "user").with_field("email", FieldDef::new(DataType::String)),
        );
        user.boot(Stage::Compile, 1, &NoCollections).await;
        let before = user.field("email").unwrap();

        user.recompile();
        assert!(user.fields().is_none());
        assert_eq!(user.completed_stage(), None);

        user.boot(Stage::Compile, 1, &NoCollections).await;
        let after = user.field("email").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before, after);
    }

    #[test]
    fn test_collection_def_defaults_for_legacy_json() {
        let json = r#"{
            "id": "c-tag",
            "name": "tag",
            "fields": { "label": { "type": "String" } },
            "description": null
        }"#;
        let def: CollectionDef = serde_json::from_str(json).unwrap();
        assert_eq!(def.created_by, "legacy-user");
        assert!(!def.hidden);
        assert_eq!(def.fields["label"].data_type, DataType::String);
    }
}
