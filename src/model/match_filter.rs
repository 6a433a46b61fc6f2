use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Reusable test of whether an override applies to a candidate object
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Match expression over a candidate JSON object, deserialized from override documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchExpr {
    /// Logical AND - all conditions must be true
    All { all: Vec<MatchExpr> },
    /// Logical OR - any condition must be true
    Any { any: Vec<MatchExpr> },
    /// Logical NOT - condition must be false
    Not { not: Box<MatchExpr> },
    Eq { eq: (JsonPath, Value) },
    Ne { ne: (JsonPath, Value) },
    Gt { gt: (JsonPath, Value) },
    Gte { gte: (JsonPath, Value) },
    Lt { lt: (JsonPath, Value) },
    Lte { lte: (JsonPath, Value) },
    /// Check if value is in a list
    In { r#in: (JsonPath, Vec<Value>) },
    NotIn { not_in: (JsonPath, Vec<Value>) },
    /// Check if string contains substring, or array contains the string
    Contains { contains: (JsonPath, String) },
    Exists { exists: JsonPath },
    NotExists { not_exists: JsonPath },
}

/// Dotted path into the candidate object, e.g. `$.tenant` or `$.user.role`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonPath(pub String);

impl JsonPath {
    fn segments(&self) -> Result<Vec<&str>> {
        let path = &self.0;
        if path == "$" {
            return Ok(Vec::new());
        }
        let rest = path
            .strip_prefix("$.")
            .ok_or_else(|| anyhow!("Invalid JSON path: {}", path))?;
        if rest.split('.').any(str::is_empty) {
            return Err(anyhow!("Invalid JSON path: {}", path));
        }
        Ok(rest.split('.').collect())
    }

    /// Extract the value at this path; array segments are addressed by index
    pub fn extract<'a>(&self, candidate: &'a Value) -> Option<&'a Value> {
        let segments = self.segments().ok()?;
        segments.into_iter().try_fold(candidate, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl MatchExpr {
    /// Check every path in the expression, then capture it into a predicate
    pub fn compile(&self) -> Result<Predicate> {
        self.validate()?;
        let expr = self.clone();
        Ok(Arc::new(move |candidate: &Value| expr.matches(candidate)))
    }

    fn validate(&self) -> Result<()> {
        match self {
            MatchExpr::All { all: exprs } | MatchExpr::Any { any: exprs } => {
                exprs.iter().try_for_each(MatchExpr::validate)
            }
            MatchExpr::Not { not } => not.validate(),
            MatchExpr::Eq { eq: (path, _) }
            | MatchExpr::Ne { ne: (path, _) }
            | MatchExpr::Gt { gt: (path, _) }
            | MatchExpr::Gte { gte: (path, _) }
            | MatchExpr::Lt { lt: (path, _) }
            | MatchExpr::Lte { lte: (path, _) }
            | MatchExpr::In { r#in: (path, _) }
            | MatchExpr::NotIn { not_in: (path, _) }
            | MatchExpr::Contains { contains: (path, _) }
            | MatchExpr::Exists { exists: path }
            | MatchExpr::NotExists { not_exists: path } => path.segments().map(|_| ()),
        }
    }

    /// Evaluate against a candidate object
    pub fn matches(&self, candidate: &Value) -> bool {
        match self {
            MatchExpr::All { all } => all.iter().all(|e| e.matches(candidate)),
            MatchExpr::Any { any } => any.iter().any(|e| e.matches(candidate)),
            MatchExpr::Not { not } => !not.matches(candidate),
            MatchExpr::Eq { eq: (path, value) } => path.extract(candidate) == Some(value),
            MatchExpr::Ne { ne: (path, value) } => path.extract(candidate) != Some(value),
            MatchExpr::Gt { gt: (path, value) } => {
                compare_values(path.extract(candidate), value, |a, b| a > b)
            }
            MatchExpr::Gte { gte: (path, value) } => {
                compare_values(path.extract(candidate), value, |a, b| a >= b)
            }
            MatchExpr::Lt { lt: (path, value) } => {
                compare_values(path.extract(candidate), value, |a, b| a < b)
            }
            MatchExpr::Lte { lte: (path, value) } => {
                compare_values(path.extract(candidate), value, |a, b| a <= b)
            }
            MatchExpr::In { r#in: (path, values) } => path
                .extract(candidate)
                .map_or(false, |v| values.contains(v)),
            // A missing value is not in the list
            MatchExpr::NotIn { not_in: (path, values) } => path
                .extract(candidate)
                .map_or(true, |v| !values.contains(v)),
            MatchExpr::Contains {
                contains: (path, needle),
            } => match path.extract(candidate) {
                Some(Value::String(s)) => s.contains(needle.as_str()),
                Some(Value::Array(items)) => items.iter().any(|i| i.as_str() == Some(needle.as_str())),
                _ => false,
            },
            MatchExpr::Exists { exists } => exists.extract(candidate).is_some(),
            MatchExpr::NotExists { not_exists } => not_exists.extract(candidate).is_none(),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Numeric comparison when both sides read as numbers, lexicographic for two strings
fn compare_values<F>(left: Option<&Value>, right: &Value, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    let Some(left) = left else {
        return false;
    };
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => cmp(l, r),
        _ => match (left, right) {
            (Value::String(l), Value::String(r)) => {
                let ordering = l.cmp(r) as i32 as f64;
                cmp(ordering, 0.0)
            }
            _ => false,
        },
    }
}

/// Predicate for an optional match spec; no spec matches every candidate
pub fn compile_match(spec: Option<&MatchExpr>) -> Result<Predicate> {
    match spec {
        Some(expr) => expr.compile(),
        None => Ok(Arc::new(|_: &Value| true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_match_expr_deserialization() {
        let expr: MatchExpr = serde_json::from_value(json!({
            "all": [
                { "eq": ["$.tenant", "acme"] },
                { "in": ["$.user.role", ["admin", "owner"]] }
            ]
        }))
        .unwrap();

        assert!(expr.matches(&json!({ "tenant": "acme", "user": { "role": "owner" } })));
        assert!(!expr.matches(&json!({ "tenant": "acme", "user": { "role": "guest" } })));
        assert!(!expr.matches(&json!({ "tenant": "other" })));
    }

    #[test]
    fn test_number_vs_string_comparison() {
        let expr: MatchExpr = serde_json::from_value(json!({ "lt": ["$.level", "10"] })).unwrap();
        assert!(expr.matches(&json!({ "level": 3 })));
        assert!(!expr.matches(&json!({ "level": "12" })));
        assert!(!expr.matches(&json!({})));
    }

    #[test]
    fn test_compile_rejects_invalid_paths() {
        let expr: MatchExpr = serde_json::from_value(json!({ "exists": "tenant" })).unwrap();
        assert!(expr.compile().is_err());

        let nested = MatchExpr::Not {
            not: Box::new(MatchExpr::Exists {
                exists: JsonPath("$.a..b".to_string()),
            }),
        };
        assert!(nested.compile().is_err());
    }

    #[test]
    fn test_absent_spec_matches_everything() {
        let predicate = compile_match(None).unwrap();
        assert!(predicate(&json!(null)));
        assert!(predicate(&json!({ "anything": 1 })));
    }

    #[test]
    fn test_contains_on_arrays_and_strings() {
        let expr: MatchExpr =
            serde_json::from_value(json!({ "contains": ["$.roles", "editor"] })).unwrap();
        let predicate = expr.compile().unwrap();
        assert!(predicate(&json!({ "roles": ["viewer", "editor"] })));
        assert!(!predicate(&json!({ "roles": ["viewer"] })));
        assert!(predicate(&json!({ "roles": "chief-editor" })));
    }
}
