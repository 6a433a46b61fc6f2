use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{FieldDef, Id, MatchExpr};

/// Persisted, conditionally-applied amendment to a collection's field tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaOverride {
    pub id: Id,

    /// Id of the collection this override amends
    pub target_collection_id: Id,

    /// Which candidate objects the override applies to; absent means all of them
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_spec: Option<MatchExpr>,

    /// Incremental field tree merged into the target's fields
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,

    /// Authored text the field tree was produced from, kept for editing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl SchemaOverride {
    pub fn new(id: impl Into<Id>, target_collection_id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            target_collection_id: target_collection_id.into(),
            match_spec: None,
            fields: BTreeMap::new(),
            source: None,
        }
    }

    pub fn when(mut self, spec: MatchExpr) -> Self {
        self.match_spec = Some(spec);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldDef) -> Self {
        self.fields.insert(name.into(), field);
        self
    }
}
