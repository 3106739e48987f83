//! Payload filters.
//!
//! A point passes a [`Filter`] when every `must` condition holds, at least
//! one `should` condition holds (if any are given), and no `must_not`
//! condition holds. Keys may address nested fields with dots (`meta.lang`).
//! An array field matches when any element matches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Payload;

/// A single payload condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Field equals `value`
    Match { key: String, value: Value },
    /// Field equals any of `values`
    MatchAny { key: String, values: Vec<Value> },
    /// Numeric field within bounds
    Range {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gt: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<f64>,
    },
    /// String field contains `text` (case-sensitive)
    TextContains { key: String, text: String },
}

impl Condition {
    pub fn matches(&self, payload: &Payload) -> bool {
        let key = self.key();
        let Some(field) = lookup(payload, key) else {
            return false;
        };

        any_element(field, |value| match self {
            Condition::Match { value: expected, .. } => value == expected,
            Condition::MatchAny { values, .. } => values.contains(value),
            Condition::Range {
                gt, gte, lt, lte, ..
            } => value.as_f64().is_some_and(|n| {
                gt.map_or(true, |b| n > b)
                    && gte.map_or(true, |b| n >= b)
                    && lt.map_or(true, |b| n < b)
                    && lte.map_or(true, |b| n <= b)
            }),
            Condition::TextContains { text, .. } => {
                value.as_str().is_some_and(|s| s.contains(text.as_str()))
            }
        })
    }

    pub fn key(&self) -> &str {
        match self {
            Condition::Match { key, .. }
            | Condition::MatchAny { key, .. }
            | Condition::Range { key, .. }
            | Condition::TextContains { key, .. } => key,
        }
    }
}

/// Boolean combination of payload conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, condition: Condition) -> Self {
        self.must.push(condition);
        self
    }

    pub fn should(mut self, condition: Condition) -> Self {
        self.should.push(condition);
        self
    }

    pub fn must_not(mut self, condition: Condition) -> Self {
        self.must_not.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    /// All conditions, in must/should/must_not order.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.must
            .iter()
            .chain(self.should.iter())
            .chain(self.must_not.iter())
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|c| c.matches(payload))
            && (self.should.is_empty() || self.should.iter().any(|c| c.matches(payload)))
            && !self.must_not.iter().any(|c| c.matches(payload))
    }
}

/// Convenience constructor for an exact match.
pub fn match_value(key: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition::Match {
        key: key.into(),
        value: value.into(),
    }
}

fn lookup<'a>(payload: &'a Payload, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = payload.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn any_element(field: &Value, predicate: impl Fn(&Value) -> bool) -> bool {
    match field {
        Value::Array(items) => items.iter().any(&predicate),
        other => predicate(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_match_and_nested_keys() {
        let p = payload(json!({"lang": "rust", "meta": {"year": 2024}}));
        assert!(match_value("lang", "rust").matches(&p));
        assert!(!match_value("lang", "go").matches(&p));
        assert!(match_value("meta.year", 2024).matches(&p));
        assert!(!match_value("missing", "x").matches(&p));
    }

    #[test]
    fn test_array_field_matches_any_element() {
        let p = payload(json!({"tags": ["db", "cache"]}));
        assert!(match_value("tags", "cache").matches(&p));
        let any = Condition::MatchAny {
            key: "tags".into(),
            values: vec![json!("web"), json!("db")],
        };
        assert!(any.matches(&p));
    }

    #[test]
    fn test_range_bounds() {
        let p = payload(json!({"score": 5}));
        let range = |gt, gte, lt, lte| Condition::Range {
            key: "score".into(),
            gt,
            gte,
            lt,
            lte,
        };
        assert!(range(None, Some(5.0), None, None).matches(&p));
        assert!(!range(Some(5.0), None, None, None).matches(&p));
        assert!(range(Some(1.0), None, Some(10.0), None).matches(&p));
        assert!(!range(None, None, None, Some(4.5)).matches(&p));
    }

    #[test]
    fn test_text_contains() {
        let p = payload(json!({"body": "vector databases are fun"}));
        let cond = Condition::TextContains {
            key: "body".into(),
            text: "databases".into(),
        };
        assert!(cond.matches(&p));
    }

    #[test]
    fn test_boolean_combination() {
        let p = payload(json!({"lang": "rust", "draft": false}));
        let filter = Filter::new()
            .must(match_value("lang", "rust"))
            .should(match_value("draft", true))
            .should(match_value("draft", false))
            .must_not(match_value("lang", "go"));
        assert!(filter.matches(&p));

        let excluded = Filter::new().must_not(match_value("lang", "rust"));
        assert!(!excluded.matches(&p));

        let no_should = Filter::new().should(match_value("lang", "go"));
        assert!(!no_should.matches(&p));

        assert!(Filter::new().matches(&p));
    }

    #[test]
    fn test_filter_deserializes_from_json() {
        let filter: Filter = serde_json::from_value(json!({
            "must": [{"type": "match", "key": "lang", "value": "rust"}],
            "must_not": [{"type": "range", "key": "year", "lt": 2000}]
        }))
        .unwrap();
        assert_eq!(filter.must.len(), 1);
        assert!(filter.should.is_empty());
        assert!(matches!(filter.must_not[0], Condition::Range { lt: Some(_), .. }));
    }
}
