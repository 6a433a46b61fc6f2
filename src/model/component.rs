use serde::{Deserialize, Serialize};

use crate::model::Id;

/// Ordered metadata-resolution phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Compile,
    Link,
    PostLink,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Compile, Stage::Link, Stage::PostLink];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Compile => "compile",
            Stage::Link => "link",
            Stage::PostLink => "post-link",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single `boot` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not ready yet, with the reasons why
    Pending(Vec<String>),
}

impl Readiness {
    pub fn pending(reason: impl Into<String>) -> Self {
        Readiness::Pending(vec![reason.into()])
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

impl From<()> for Readiness {
    fn from(_: ()) -> Self {
        Readiness::Ready
    }
}

impl From<String> for Readiness {
    fn from(reason: String) -> Self {
        if reason.is_empty() {
            Readiness::Ready
        } else {
            Readiness::Pending(vec![reason])
        }
    }
}

impl From<Vec<String>> for Readiness {
    fn from(reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            Readiness::Ready
        } else {
            Readiness::Pending(reasons)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Collection,
    Plugin,
}

/// Read-only view of the registered collections, handed to components while they boot
pub trait Catalog: Send + Sync {
    /// Id of the compiled collection registered under `name`
    fn resolve_link(&self, name: &str) -> Option<Id>;

    /// Latest stage the collection named `name` has finished
    fn completed_stage(&self, name: &str) -> Option<Stage>;
}

/// A pluggable unit taking part in the boot lifecycle
#[async_trait::async_trait]
pub trait Component: Send + Sync {
    /// Stable identifier
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn kind(&self) -> ComponentKind;

    /// Whether this component has a boot hook for `stage`
    fn boots(&self, _stage: Stage) -> bool {
        true
    }

    async fn boot(&self, stage: Stage, pass: u32, catalog: &dyn Catalog) -> Readiness;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_conversions() {
        assert_eq!(Readiness::from(()), Readiness::Ready);
        assert_eq!(Readiness::from(String::new()), Readiness::Ready);
        assert_eq!(Readiness::from(Vec::<String>::new()), Readiness::Ready);
        assert_eq!(
            Readiness::from("waiting on user".to_string()),
            Readiness::pending("waiting on user")
        );
    }

    #[test]
    fn test_stage_order_and_names() {
        assert!(Stage::Compile < Stage::Link && Stage::Link < Stage::PostLink);
        assert_eq!(serde_json::to_string(&Stage::PostLink).unwrap(), "\"post-link\"");
    }
}
