//! Scenario variables and `${name}` expansion.
//!
//! Variables hold JSON values. Inside a longer string a reference is replaced
//! by the value's text; a string that is exactly one reference becomes the
//! stored value itself, so numbers and objects keep their type.

use crate::result::{EnsayoError, EnsayoResult};
use chrono::{SecondsFormat, Utc};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Name that always expands to the current UTC instant
pub const NOW: &str = "now";

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.-]*)\}").expect("variable reference pattern")
    })
}

fn whole_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\$\{([A-Za-z_][A-Za-z0-9_.-]*)\}$").expect("whole reference pattern")
    })
}

/// Variable store of one scenario run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars(BTreeMap<String, Value>);

impl Vars {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Set a variable (builder form)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Get a variable
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Number of stored variables
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn lookup(&self, name: &str) -> EnsayoResult<Value> {
        match self.0.get(name) {
            Some(value) => Ok(value.clone()),
            None if name == NOW => Ok(Value::String(
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
            None => Err(EnsayoError::scenario(format!("undefined variable `{name}`"))),
        }
    }

    /// Expand every reference inside `input` to text
    pub fn expand_str(&self, input: &str) -> EnsayoResult<String> {
        let mut missing = None;
        let out = reference_regex().replace_all(input, |caps: &Captures<'_>| {
            match self.lookup(&caps[1]) {
                Ok(Value::String(s)) => s,
                Ok(other) => other.to_string(),
                Err(e) => {
                    missing.get_or_insert(e);
                    String::new()
                }
            }
        });
        match missing {
            Some(e) => Err(e),
            None => Ok(out.into_owned()),
        }
    }

    /// Expand references in every string of a JSON tree
    pub fn expand_value(&self, value: &Value) -> EnsayoResult<Value> {
        Ok(match value {
            Value::String(s) => match whole_reference_regex().captures(s) {
                Some(caps) => self.lookup(&caps[1])?,
                None => Value::String(self.expand_str(s)?),
            },
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.expand_value(v))
                    .collect::<EnsayoResult<_>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.expand_value(v)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }

    /// Store with every value expanded once, so `${now}` is fixed for the whole run
    pub fn resolved(&self) -> EnsayoResult<Self> {
        let mut out = BTreeMap::new();
        for (name, value) in &self.0 {
            out.insert(name.clone(), self.expand_value(value)?);
        }
        Ok(Self(out))
    }

    /// Expand references in any serializable definition
    pub fn expand<T: Serialize + DeserializeOwned>(&self, item: &T) -> EnsayoResult<T> {
        let tree = serde_json::to_value(item)?;
        if !contains_reference(&tree) {
            return Ok(serde_json::from_value(tree)?);
        }
        let expanded = self.expand_value(&tree)?;
        serde_json::from_value(expanded)
            .map_err(|e| EnsayoError::scenario(format!("variable expansion produced an invalid value: {e}")))
    }
}

impl From<BTreeMap<String, Value>> for Vars {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

fn contains_reference(value: &Value) -> bool {
    match value {
        Value::String(s) => reference_regex().is_match(s),
        Value::Array(items) => items.iter().any(contains_reference),
        Value::Object(map) => map.values().any(contains_reference),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn vars() -> Vars {
        Vars::new()
            .with("task_id", json!(42))
            .with("status", json!("DONE"))
            .with("phase", json!({"id": 3}))
    }

    #[test]
    fn test_expand_inside_string() {
        assert_eq!(vars().expand_str("/tasks/${task_id}").unwrap(), "/tasks/42");
        assert_eq!(vars().expand_str("s=${status}").unwrap(), "s=DONE");
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let v = vars().expand_value(&json!({"id": "${task_id}", "p": "${phase}"})).unwrap();
        assert_eq!(v, json!({"id": 42, "p": {"id": 3}}));
    }

    #[test]
    fn test_undefined_variable_errors() {
        let err = vars().expand_str("${nope}").unwrap_err();
        assert!(err.to_string().contains("undefined variable `nope`"));
    }

    #[test]
    fn test_now_is_iso_utc() {
        let now = Vars::new().expand_str("${now}").unwrap();
        assert!(now.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }

    #[test]
    fn test_resolved_freezes_now() {
        let vars = Vars::new()
            .with("started_at", json!("${now}"))
            .with("count", json!(3))
            .resolved()
            .unwrap();
        let frozen = vars.get("started_at").unwrap().as_str().unwrap().to_string();
        assert!(frozen.ends_with('Z'));
        assert_eq!(vars.expand_str("${started_at}").unwrap(), frozen);
        assert_eq!(vars.get("count"), Some(&json!(3)));
    }

    #[test]
    fn test_resolved_rejects_undefined_reference() {
        let err = Vars::new().with("x", json!("${missing}")).resolved().unwrap_err();
        assert!(err.to_string().contains("undefined variable `missing`"));
    }

    #[test]
    fn test_stored_now_wins() {
        let v = Vars::new().with(NOW, json!("2025-01-01T00:00:00Z"));
        assert_eq!(v.expand_str("${now}").unwrap(), "2025-01-01T00:00:00Z");
    }

    #[test]
    fn test_expand_typed_definition() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Req {
            path: String,
            body: Value,
        }
        let req = Req {
            path: "/tasks/${task_id}".into(),
            body: json!({"status": "${status}"}),
        };
        let out = vars().expand(&req).unwrap();
        assert_eq!(out.path, "/tasks/42");
        assert_eq!(out.body, json!({"status": "DONE"}));
    }

    proptest! {
        #[test]
        fn prop_text_without_references_is_unchanged(s in "[a-zA-Z0-9 /?=&_.-]{0,40}") {
            prop_assert_eq!(vars().expand_str(&s).unwrap(), s);
        }

        #[test]
        fn prop_string_vars_round_trip(name in "[a-z][a-z0-9_]{0,10}", value in "[a-zA-Z0-9 ]{0,20}") {
            let v = Vars::new().with(name.clone(), Value::String(value.clone()));
            let expanded = v.expand_value(&Value::String(format!("${{{name}}}"))).unwrap();
            prop_assert_eq!(expanded, Value::String(value));
        }
    }
}
