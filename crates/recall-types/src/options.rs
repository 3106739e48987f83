//! Per-request embedding options.
//!
//! A small closed set of typed fields plus an `extra` map that is passed
//! through to the backend untouched. Options take part in cache-key
//! derivation, so they have a canonical JSON form that does not depend on
//! field or map insertion order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Options attached to an embedding request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingOptions {
    /// Requested output dimensions (for models that support truncation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,

    /// How long the backend should keep the model loaded (e.g., "5m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,

    /// Context window override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,

    /// Backend-specific options not covered above
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl EmbeddingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }

    pub fn with_num_ctx(mut self, num_ctx: u32) -> Self {
        self.num_ctx = Some(num_ctx);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// True when no option is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Canonical JSON encoding: object keys sorted at every depth, absent
    /// fields omitted. Identical options always produce identical strings.
    pub fn canonical_json(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        canonicalize(&value).to_string()
    }
}

/// Rebuild a JSON value with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_options_canonical() {
        assert_eq!(EmbeddingOptions::default().canonical_json(), "{}");
        assert!(EmbeddingOptions::default().is_empty());
    }

    #[test]
    fn test_extra_order_independent() {
        let a = EmbeddingOptions::new()
            .with_extra("temperature", json!(0.0))
            .with_extra("seed", json!({"b": 2, "a": 1}));
        let b = EmbeddingOptions::new()
            .with_extra("seed", json!({"a": 1, "b": 2}))
            .with_extra("temperature", json!(0.0));
        assert_eq!(a.canonical_json(), b.canonical_json());
    }

    #[test]
    fn test_typed_fields_in_canonical_form() {
        let opts = EmbeddingOptions::new().with_dimensions(256).with_num_ctx(2048);
        let canonical = opts.canonical_json();
        assert_eq!(canonical, r#"{"dimensions":256,"num_ctx":2048}"#);
    }

    #[test]
    fn test_canonicalize_nested_arrays() {
        let value = json!([{"z": 1, "a": [{"y": 2, "b": 3}]}]);
        assert_eq!(
            canonicalize(&value).to_string(),
            r#"[{"a":[{"b":3,"y":2}],"z":1}]"#
        );
    }
}
