use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::model::{Catalog, DataType, Id};

/// Compiled fields keyed by field name. Entries are shared, never mutated in place.
pub type FieldMap = HashMap<String, Arc<Field>>;

/// Field definition as authored in a collection definition or a schema override document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub data_type: DataType,

    /// Name of the collection a `link` field points to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// Element definition of an `array` field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub of: Option<Box<FieldDef>>,

    /// Nested fields of an `object` field
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldDef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    /// Allowed values, if the field is an enumeration
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

impl FieldDef {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            link: None,
            of: None,
            fields: BTreeMap::new(),
            required: None,
            values: None,
        }
    }

    pub fn link_to(collection: &str) -> Self {
        Self {
            link: Some(collection.to_string()),
            ..Self::new(DataType::Link)
        }
    }

    pub fn array_of(element: FieldDef) -> Self {
        Self {
            of: Some(Box::new(element)),
            ..Self::new(DataType::Array)
        }
    }

    pub fn object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldDef)>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Self::new(DataType::Object)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub collection: String,
    /// Filled in by link compilation
    pub collection_id: Option<Id>,
}

/// Compiled field, owned by exactly one parent map or array field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub link: Option<LinkTarget>,
    pub of: Option<Arc<Field>>,
    pub fields: FieldMap,
    pub required: bool,
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("field `{path}` is an array without an element definition")]
    ArrayWithoutElement { path: String },

    #[error("field `{path}` is a link without a target collection")]
    LinkWithoutTarget { path: String },

    #[error("field `{path}` of type {data_type} cannot declare a link target")]
    UnexpectedLink { path: String, data_type: DataType },

    #[error("field `{path}` of type {data_type} cannot declare nested fields")]
    UnexpectedNestedFields { path: String, data_type: DataType },
}

impl Field {
    /// Structural compilation: validates the shape of the definition tree.
    /// Link targets are recorded by name and left unresolved.
    pub fn compile(path: &str, def: &FieldDef) -> Result<Field, SchemaError> {
        let name = path.rsplit('.').next().unwrap_or(path).to_string();

        if !def.fields.is_empty() && def.data_type != DataType::Object {
            return Err(SchemaError::UnexpectedNestedFields {
                path: path.to_string(),
                data_type: def.data_type,
            });
        }

        let link = match (def.data_type, &def.link) {
            (DataType::Link, Some(target)) => Some(LinkTarget {
                collection: target.clone(),
                collection_id: None,
            }),
            (DataType::Link, None) => {
                return Err(SchemaError::LinkWithoutTarget {
                    path: path.to_string(),
                })
            }
            (_, Some(_)) => {
                return Err(SchemaError::UnexpectedLink {
                    path: path.to_string(),
                    data_type: def.data_type,
                })
            }
            (_, None) => None,
        };

        let of = match (def.data_type, &def.of) {
            (DataType::Array, Some(element)) => {
                Some(Arc::new(Field::compile(&format!("{}.*", path), element)?))
            }
            (DataType::Array, None) => {
                return Err(SchemaError::ArrayWithoutElement {
                    path: path.to_string(),
                })
            }
            // `of` on anything else is ignored
            _ => None,
        };

        Ok(Field {
            name,
            data_type: def.data_type,
            link,
            of,
            fields: compile_fields(path, &def.fields)?,
            required: def.required.unwrap_or(false),
            values: def.values.clone(),
        })
    }

    /// Link compilation: rebuilds this field with every link target resolved.
    /// Returns one reason per link that cannot be resolved yet.
    pub fn link(&self, path: &str, catalog: &dyn Catalog) -> Result<Field, Vec<String>> {
        let mut reasons = Vec::new();

        let link = match &self.link {
            Some(target) => match catalog.resolve_link(&target.collection) {
                Some(id) => Some(LinkTarget {
                    collection: target.collection.clone(),
                    collection_id: Some(id),
                }),
                None => {
                    reasons.push(format!(
                        "field `{}` links to unknown collection `{}`",
                        path, target.collection
                    ));
                    None
                }
            },
            None => None,
        };

        let of = match &self.of {
            Some(element) => match element.link(&format!("{}.*", path), catalog) {
                Ok(linked) => Some(Arc::new(linked)),
                Err(mut more) => {
                    reasons.append(&mut more);
                    None
                }
            },
            None => None,
        };

        let fields = match link_fields(path, &self.fields, catalog) {
            Ok(fields) => fields,
            Err(mut more) => {
                reasons.append(&mut more);
                FieldMap::new()
            }
        };

        if !reasons.is_empty() {
            return Err(reasons);
        }

        Ok(Field {
            name: self.name.clone(),
            data_type: self.data_type,
            link,
            of,
            fields,
            required: self.required,
            values: self.values.clone(),
        })
    }

    pub fn is_object(&self) -> bool {
        self.data_type == DataType::Object
    }

    /// Names of every collection this field (or anything below it) links to
    pub fn link_targets(&self) -> Vec<&LinkTarget> {
        let mut targets = Vec::new();
        if let Some(target) = &self.link {
            targets.push(target);
        }
        if let Some(element) = &self.of {
            targets.extend(element.link_targets());
        }
        for field in self.fields.values() {
            targets.extend(field.link_targets());
        }
        targets
    }
}

fn child_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Structurally compile a map of field definitions
pub fn compile_fields(
    prefix: &str,
    defs: &BTreeMap<String, FieldDef>,
) -> Result<FieldMap, SchemaError> {
    defs.iter()
        .map(|(name, def)| {
            Field::compile(&child_path(prefix, name), def).map(|f| (name.clone(), Arc::new(f)))
        })
        .collect()
}

/// Link-compile a map of compiled fields, collecting every unresolved link
pub fn link_fields(
    prefix: &str,
    fields: &FieldMap,
    catalog: &dyn Catalog,
) -> Result<FieldMap, Vec<String>> {
    let mut linked = FieldMap::with_capacity(fields.len());
    let mut reasons = Vec::new();

    // Sorted so diagnostics come out in a stable order
    let mut names: Vec<&String> = fields.keys().collect();
    names.sort();

    for name in names {
        match fields[name].link(&child_path(prefix, name), catalog) {
            Ok(field) => {
                linked.insert(name.clone(), Arc::new(field));
            }
            Err(mut more) => reasons.append(&mut more),
        }
    }

    if reasons.is_empty() {
        Ok(linked)
    } else {
        Err(reasons)
    }
}
