use serde::{Deserialize, Serialize};

pub type Id = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[serde(alias = "String")] // Keep for backward compatibility
    String,
    #[serde(alias = "Number")]
    Number,
    #[serde(alias = "Boolean")]
    Boolean,
    #[serde(alias = "Date")]
    Date,
    #[serde(alias = "Object")]
    Object,
    #[serde(alias = "Array")]
    Array,
    #[serde(alias = "Link")]
    Link,
    #[serde(alias = "Any")]
    Any,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Object => "object",
            DataType::Array => "array",
            DataType::Link => "link",
            DataType::Any => "any",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
