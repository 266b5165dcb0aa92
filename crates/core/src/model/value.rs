use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Closed set of attribute and metric value types accepted at the
/// serialization boundary. Anything outside this set is stringified
/// before it enters the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<Value>),
}

pub type AttributeMap = BTreeMap<String, Value>;

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_untagged_variants() {
        let v: Value = serde_json::from_str("\"api\"").unwrap();
        assert_eq!(v, Value::Str("api".into()));
        let v: Value = serde_json::from_str("42").unwrap();
        assert_eq!(v, Value::Int(42));
        let v: Value = serde_json::from_str("1.5").unwrap();
        assert_eq!(v, Value::Double(1.5));
        let v: Value = serde_json::from_str("[true, 1]").unwrap();
        assert_eq!(v, Value::Array(vec![Value::Bool(true), Value::Int(1)]));
    }
}
