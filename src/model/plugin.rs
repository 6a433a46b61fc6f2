use crate::model::{Catalog, Component, ComponentKind, Id, Readiness, Stage};

/// A plugin that takes part in the stages it lists, becoming ready in each once
/// every collection it requires has finished that same stage.
#[derive(Debug, Clone)]
pub struct Plugin {
    id: Id,
    name: String,
    requires: Vec<String>,
    stages: Vec<Stage>,
}

impl Plugin {
    pub fn new(id: impl Into<Id>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            requires: Vec::new(),
            stages: Stage::ALL.to_vec(),
        }
    }

    pub fn requires(mut self, collection: impl Into<String>) -> Self {
        self.requires.push(collection.into());
        self
    }

    pub fn in_stages(mut self, stages: &[Stage]) -> Self {
        self.stages = stages.to_vec();
        self
    }
}

#[async_trait::async_trait]
impl Component for Plugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Plugin
    }

    fn boots(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    async fn boot(&self, stage: Stage, _pass: u32, catalog: &dyn Catalog) -> Readiness {
        self.requires
            .iter()
            .filter(|name| {
                catalog
                    .completed_stage(name)
                    .map_or(true, |reached| reached < stage)
            })
            .map(|name| {
                format!(
                    "plugin `{}` requires collection `{}` to finish {}",
                    self.name, name, stage
                )
            })
            .collect::<Vec<_>>()
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Reached(HashMap<&'static str, Stage>);

    impl Catalog for Reached {
        fn resolve_link(&self, name: &str) -> Option<Id> {
            self.0.get(name).map(|_| name.to_string())
        }

        fn completed_stage(&self, name: &str) -> Option<Stage> {
            self.0.get(name).copied()
        }
    }

    #[tokio::test]
    async fn test_plugin_waits_for_required_collections() {
        let plugin = Plugin::new("p-search", "search")
            .requires("user")
            .requires("post");

        let catalog = Reached(HashMap::from([("user", Stage::Link), ("post", Stage::Compile)]));

        assert!(plugin.boot(Stage::Compile, 1, &catalog).await.is_ready());
        assert_eq!(
            plugin.boot(Stage::Link, 1, &catalog).await,
            Readiness::pending("plugin `search` requires collection `post` to finish link")
        );
    }

    #[test]
    fn test_plugin_declares_its_stages() {
        let plugin = Plugin::new("p-audit", "audit").in_stages(&[Stage::PostLink]);
        assert!(!plugin.boots(Stage::Compile));
        assert!(plugin.boots(Stage::PostLink));
    }
}
