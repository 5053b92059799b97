//! Tagged value type for tool payloads.
//!
//! Tool arguments and results travel as free-form JSON on the wire.
//! `ToolValue` gives that currency a closed shape with typed accessors
//! while serializing to exactly the same JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A JSON-shaped value exchanged with AI tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<ToolValue>),
    Object(BTreeMap<String, ToolValue>),
}

impl ToolValue {
    /// Shorthand for the `{"error": message}` shape used in tool-response
    /// turns.
    pub fn error(message: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("error".to_string(), ToolValue::String(message.into()));
        ToolValue::Object(map)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ToolValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ToolValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ToolValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ToolValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, ToolValue>> {
        match self {
            ToolValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ToolValue]> {
        match self {
            ToolValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Field lookup on objects; `None` for every other variant.
    pub fn get(&self, key: &str) -> Option<&ToolValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Convenience: `get(key)` then `as_str`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ToolValue::Null)
    }
}

impl From<serde_json::Value> for ToolValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ToolValue::Null,
            serde_json::Value::Bool(b) => ToolValue::Bool(b),
            serde_json::Value::Number(n) => ToolValue::Number(n),
            serde_json::Value::String(s) => ToolValue::String(s),
            serde_json::Value::Array(items) => {
                ToolValue::Array(items.into_iter().map(ToolValue::from).collect())
            }
            serde_json::Value::Object(map) => ToolValue::Object(
                map.into_iter().map(|(k, v)| (k, ToolValue::from(v))).collect(),
            ),
        }
    }
}

impl From<ToolValue> for serde_json::Value {
    fn from(value: ToolValue) -> Self {
        match value {
            ToolValue::Null => serde_json::Value::Null,
            ToolValue::Bool(b) => serde_json::Value::Bool(b),
            ToolValue::Number(n) => serde_json::Value::Number(n),
            ToolValue::String(s) => serde_json::Value::String(s),
            ToolValue::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            ToolValue::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_unchanged() {
        let raw = serde_json::json!({
            "city": "Madrid",
            "count": 3,
            "nested": { "flag": true, "items": [1, "two", null] }
        });
        let value = ToolValue::from(raw.clone());
        let back: serde_json::Value = value.into();
        assert_eq!(back, raw);
    }

    #[test]
    fn typed_accessors() {
        let value = ToolValue::from(serde_json::json!({
            "action": "terminate_session",
            "count": 2,
        }));
        assert_eq!(value.get_str("action"), Some("terminate_session"));
        assert_eq!(value.get("count").and_then(|v| v.as_i64()), Some(2));
        assert!(value.get("missing").is_none());
    }

    #[test]
    fn error_shape() {
        let err = ToolValue::error("tool not found");
        let json: serde_json::Value = err.into();
        assert_eq!(json, serde_json::json!({"error": "tool not found"}));
    }
}
