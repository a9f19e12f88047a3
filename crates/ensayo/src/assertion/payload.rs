//! Structural checks on decoded JSON payloads.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Longest rendering of an observed value in a mismatch
const MAX_DESCRIBE_CHARS: usize = 120;

/// JSON value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonType {
    /// `null`
    Null,
    /// `true` / `false`
    Bool,
    /// Number without fractional part
    Integer,
    /// Any number
    Number,
    /// String
    String,
    /// Array
    Array,
    /// Object
    Object,
}

impl JsonType {
    /// Most specific type of a value
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Whether `value` is of this type (integers are numbers)
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        let actual = Self::of(value);
        actual == self || (self == Self::Number && actual == Self::Integer)
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        })
    }
}

/// Rule applied to one field of a payload.
///
/// Every set option must hold. A missing field fails any rule except
/// `present: false`; `null` passes when `nullable` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldRule {
    /// Require the field to exist (`true`) or be absent (`false`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub present: Option<bool>,
    /// Required type
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<JsonType>,
    /// Exact value (numbers compare by value)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    /// Allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Value>>,
    /// Inclusive lower bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Non-empty string, array or object
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub non_empty: bool,
    /// Minimum length of a string, array or object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Accept `null` regardless of the other options
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    /// Keys an object must carry (values may be null)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Checks applied to every element of an array
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub each: Vec<ElementCheck>,
    /// Timestamp denoting the same instant, whatever the offset or precision notation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_instant: Option<String>,
    /// Alternatives; at least one must hold
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<FieldRule>,
}

/// Check on a field of each array element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementCheck {
    /// JSON pointer relative to the element (empty = the element itself)
    #[serde(default)]
    pub path: String,
    /// Rule for the field
    pub rule: FieldRule,
}

/// Why a rule did not hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Pointer of the offending field
    pub path: String,
    /// Expected state
    pub expected: String,
    /// Observed state
    pub actual: String,
}

impl Mismatch {
    fn new(path: &str, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Normalize a path to a JSON pointer (`total` becomes `/total`)
#[must_use]
pub fn normalize_pointer(path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Look up a field by pointer
#[must_use]
pub fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    body.pointer(&normalize_pointer(path))
}

/// Compact rendering of an observed value
#[must_use]
pub fn describe(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= MAX_DESCRIBE_CHARS {
        return text;
    }
    let cut: String = text.chars().take(MAX_DESCRIBE_CHARS).collect();
    format!("{cut}...")
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

/// Parse an ISO-8601 timestamp; values without an offset are taken as UTC
#[must_use]
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        Value::Object(o) => Some(o.len()),
        _ => None,
    }
}

fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl FieldRule {
    /// Rule requiring a type
    #[must_use]
    pub fn of_type(kind: JsonType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Rule requiring an exact value
    #[must_use]
    pub fn equals(value: Value) -> Self {
        Self {
            equals: Some(value),
            ..Self::default()
        }
    }

    /// Set inclusive bounds
    #[must_use]
    pub fn between(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Accept `null`
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Check `value` found at `path`
    pub fn check(&self, value: Option<&Value>, path: &str) -> Result<(), Mismatch> {
        let Some(value) = value else {
            if self.present == Some(false) {
                return Ok(());
            }
            return Err(Mismatch::new(path, "field present", "missing"));
        };
        if self.present == Some(false) {
            return Err(Mismatch::new(path, "field absent", describe(value)));
        }
        if value.is_null() && self.nullable {
            return Ok(());
        }

        if let Some(kind) = self.kind {
            if !kind.accepts(value) {
                return Err(Mismatch::new(
                    path,
                    format!("type {kind}"),
                    format!("{} {}", JsonType::of(value), describe(value)),
                ));
            }
        }
        if let Some(expected) = &self.equals {
            if !json_eq(value, expected) {
                return Err(Mismatch::new(path, describe(expected), describe(value)));
            }
        }
        if let Some(options) = &self.one_of {
            if !options.iter().any(|o| json_eq(value, o)) {
                return Err(Mismatch::new(
                    path,
                    format!("one of {}", describe(&Value::Array(options.clone()))),
                    describe(value),
                ));
            }
        }
        self.check_bounds(value, path)?;
        self.check_size(value, path)?;
        self.check_instant(value, path)?;

        if !self.keys.is_empty() {
            let Some(object) = value.as_object() else {
                return Err(Mismatch::new(path, "object", describe(value)));
            };
            let missing: Vec<&str> = self
                .keys
                .iter()
                .filter(|k| !object.contains_key(k.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(Mismatch::new(
                    path,
                    format!("keys [{}]", self.keys.join(", ")),
                    format!("missing [{}]", missing.join(", ")),
                ));
            }
        }

        if !self.each.is_empty() {
            let Some(items) = value.as_array() else {
                return Err(Mismatch::new(path, "array", describe(value)));
            };
            for (i, item) in items.iter().enumerate() {
                for check in &self.each {
                    let pointer = normalize_pointer(&check.path);
                    let field = if pointer.is_empty() { Some(item) } else { item.pointer(&pointer) };
                    check.rule.check(field, &format!("{path}/{i}{pointer}"))?;
                }
            }
        }

        if !self.any_of.is_empty() {
            let mut first = None;
            for alternative in &self.any_of {
                match alternative.check(Some(value), path) {
                    Ok(()) => return Ok(()),
                    Err(m) => {
                        first.get_or_insert(m);
                    }
                }
            }
            let actual = first.map_or_else(|| describe(value), |m| m.actual);
            return Err(Mismatch::new(
                path,
                format!("any of {} alternatives", self.any_of.len()),
                actual,
            ));
        }
        Ok(())
    }

    fn check_bounds(&self, value: &Value, path: &str) -> Result<(), Mismatch> {
        if self.min.is_none() && self.max.is_none() {
            return Ok(());
        }
        let Some(n) = value.as_f64() else {
            return Err(Mismatch::new(path, "number", describe(value)));
        };
        if let Some(min) = self.min {
            if n < min {
                return Err(Mismatch::new(path, format!(">= {}", fmt_num(min)), describe(value)));
            }
        }
        if let Some(max) = self.max {
            if n > max {
                return Err(Mismatch::new(path, format!("<= {}", fmt_num(max)), describe(value)));
            }
        }
        Ok(())
    }

    fn check_instant(&self, value: &Value, path: &str) -> Result<(), Mismatch> {
        let Some(expected) = &self.same_instant else {
            return Ok(());
        };
        let expected_at = parse_instant(expected).ok_or_else(|| {
            Mismatch::new(path, format!("instant {expected}"), "unparseable expected timestamp")
        })?;
        match value.as_str().and_then(parse_instant) {
            Some(actual) if actual == expected_at => Ok(()),
            _ => Err(Mismatch::new(path, format!("instant {expected}"), describe(value))),
        }
    }

    fn check_size(&self, value: &Value, path: &str) -> Result<(), Mismatch> {
        if self.non_empty && length(value).map_or(true, |n| n == 0) {
            return Err(Mismatch::new(path, "non-empty", describe(value)));
        }
        if let Some(min) = self.min_length {
            match length(value) {
                Some(n) if n >= min => {}
                Some(n) => {
                    return Err(Mismatch::new(path, format!("length >= {min}"), format!("length {n}")))
                }
                None => return Err(Mismatch::new(path, format!("length >= {min}"), describe(value))),
            }
        }
        Ok(())
    }
}

/// Require the numeric fields at `parts` to sum to at most the field at `total`
pub fn check_sum_at_most(body: &Value, parts: &[String], total: &str) -> Result<(), Mismatch> {
    let number = |path: &str| -> Result<f64, Mismatch> {
        let normalized = normalize_pointer(path);
        match body.pointer(&normalized) {
            Some(v) => v
                .as_f64()
                .ok_or_else(|| Mismatch::new(&normalized, "number", describe(v))),
            None => Err(Mismatch::new(&normalized, "field present", "missing")),
        }
    };
    let limit = number(total)?;
    let mut sum = 0.0;
    for part in parts {
        sum += number(part)?;
    }
    if sum <= limit {
        return Ok(());
    }
    Err(Mismatch::new(
        &normalize_pointer(total),
        format!("{} <= {}", parts.join(" + "), fmt_num(limit)),
        format!("sum {}", fmt_num(sum)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn task() -> Value {
        json!({
            "id": 12,
            "status": "IN_PROGRESS",
            "started_at": "2025-01-15T10:00:00Z",
            "completed_at": null,
            "progress": 0.5,
            "tags": ["ui", "api"]
        })
    }

    mod rule_tests {
        use super::*;

        #[test]
        fn test_missing_field_fails_by_default() {
            let m = FieldRule::of_type(JsonType::String)
                .check(lookup(&task(), "/owner"), "/owner")
                .unwrap_err();
            assert_eq!(m.expected, "field present");
            assert_eq!(m.actual, "missing");
        }

        #[test]
        fn test_present_false() {
            let rule = FieldRule {
                present: Some(false),
                ..FieldRule::default()
            };
            assert!(rule.check(lookup(&task(), "owner"), "/owner").is_ok());
            assert!(rule.check(lookup(&task(), "id"), "/id").is_err());
        }

        #[test]
        fn test_types() {
            let t = task();
            assert!(FieldRule::of_type(JsonType::Integer).check(lookup(&t, "/id"), "/id").is_ok());
            assert!(FieldRule::of_type(JsonType::Number).check(lookup(&t, "/id"), "/id").is_ok());
            assert!(FieldRule::of_type(JsonType::Integer)
                .check(lookup(&t, "/progress"), "/progress")
                .is_err());
            assert!(FieldRule::of_type(JsonType::Null)
                .check(lookup(&t, "/completed_at"), "/completed_at")
                .is_ok());
        }

        #[test]
        fn test_nullable_string() {
            let rule = FieldRule::of_type(JsonType::String).nullable();
            let t = task();
            assert!(rule.check(lookup(&t, "/completed_at"), "/completed_at").is_ok());
            assert!(rule.check(lookup(&t, "/started_at"), "/started_at").is_ok());
            assert!(rule.check(lookup(&t, "/id"), "/id").is_err());
        }

        #[test]
        fn test_equals_compares_numbers_by_value() {
            assert!(FieldRule::equals(json!(12.0)).check(Some(&json!(12)), "/id").is_ok());
            let m = FieldRule::equals(json!("DONE"))
                .check(Some(&json!("IN_PROGRESS")), "/status")
                .unwrap_err();
            assert_eq!(m.expected, "\"DONE\"");
            assert_eq!(m.actual, "\"IN_PROGRESS\"");
        }

        #[test]
        fn test_bounds() {
            let rule = FieldRule::of_type(JsonType::Number).between(0.0, 100.0);
            assert!(rule.check(Some(&json!(42.5)), "/gap_percentage").is_ok());
            let m = rule.check(Some(&json!(101)), "/gap_percentage").unwrap_err();
            assert_eq!(m.expected, "<= 100");
            assert!(rule.check(Some(&json!(-1)), "/x").is_err());
        }

        #[test]
        fn test_size_rules() {
            let rule = FieldRule {
                non_empty: true,
                ..FieldRule::default()
            };
            assert!(rule.check(Some(&json!([1])), "").is_ok());
            assert!(rule.check(Some(&json!([])), "").is_err());
            assert!(rule.check(Some(&json!("")), "").is_err());

            let rule = FieldRule {
                min_length: Some(2),
                ..FieldRule::default()
            };
            assert!(rule.check(lookup(&task(), "/tags"), "/tags").is_ok());
            let m = rule.check(Some(&json!(["x"])), "/tags").unwrap_err();
            assert_eq!(m.actual, "length 1");
        }

        #[test]
        fn test_keys_report_missing() {
            let rule = FieldRule {
                keys: vec!["started_at".into(), "scheduled_start".into()],
                ..FieldRule::default()
            };
            let m = rule.check(Some(&task()), "").unwrap_err();
            assert_eq!(m.actual, "missing [scheduled_start]");
            assert_eq!(m.path, "/");
        }

        #[test]
        fn test_each_reports_element_path() {
            let body = json!([
                {"status": "DONE"},
                {"status": "PENDING"},
                {"status": "ARCHIVED"}
            ]);
            let rule = FieldRule {
                each: vec![ElementCheck {
                    path: "status".into(),
                    rule: FieldRule {
                        one_of: Some(vec![
                            json!("PENDING"),
                            json!("IN_PROGRESS"),
                            json!("DONE"),
                            json!("BLOCKED"),
                        ]),
                        ..FieldRule::default()
                    },
                }],
                ..FieldRule::default()
            };
            let m = rule.check(Some(&body), "").unwrap_err();
            assert_eq!(m.path, "/2/status");
            assert_eq!(m.actual, "\"ARCHIVED\"");
        }

        #[test]
        fn test_any_of() {
            let rule = FieldRule {
                any_of: vec![
                    FieldRule::of_type(JsonType::Array),
                    FieldRule {
                        keys: vec!["data".into()],
                        ..FieldRule::default()
                    },
                ],
                ..FieldRule::default()
            };
            assert!(rule.check(Some(&json!([])), "").is_ok());
            assert!(rule.check(Some(&json!({"data": []})), "").is_ok());
            let m = rule.check(Some(&json!("x")), "").unwrap_err();
            assert_eq!(m.expected, "any of 2 alternatives");
        }

        #[test]
        fn test_yaml_rule() {
            let rule: FieldRule = serde_yaml_ng::from_str(
                "type: integer\nmin: 0\neach: []\nnullable: false",
            )
            .unwrap();
            assert_eq!(rule.kind, Some(JsonType::Integer));
            assert_eq!(rule.min, Some(0.0));
            assert!(serde_yaml_ng::from_str::<FieldRule>("minimum: 0").is_err());
        }
    }

    mod instant_tests {
        use super::*;

        fn same_instant(expected: &str) -> FieldRule {
            FieldRule {
                same_instant: Some(expected.to_string()),
                ..FieldRule::default()
            }
        }

        #[test]
        fn test_offset_notations_agree() {
            let rule = same_instant("2025-01-15T10:00:00.000Z");
            assert!(rule.check(lookup(&task(), "/started_at"), "/started_at").is_ok());
            assert!(rule
                .check(Some(&json!("2025-01-15T12:00:00+02:00")), "/started_at")
                .is_ok());
            assert!(rule
                .check(Some(&json!("2025-01-15T10:00:00")), "/started_at")
                .is_ok());
        }

        #[test]
        fn test_rewritten_timestamp_fails() {
            let m = same_instant("2025-01-15T10:00:00.000Z")
                .check(Some(&json!("1999-01-01T00:00:00Z")), "/started_at")
                .unwrap_err();
            assert_eq!(m.path, "/started_at");
            assert_eq!(m.expected, "instant 2025-01-15T10:00:00.000Z");
            assert_eq!(m.actual, "\"1999-01-01T00:00:00Z\"");
        }

        #[test]
        fn test_non_timestamp_fails() {
            let rule = same_instant("2025-01-15T10:00:00Z");
            assert!(rule.check(Some(&json!(null)), "/x").is_err());
            assert!(rule.check(Some(&json!("soon")), "/x").is_err());
            assert!(same_instant("not a time")
                .check(Some(&json!("2025-01-15T10:00:00Z")), "/x")
                .is_err());
        }

        #[test]
        fn test_yaml_spelling() {
            let rule: FieldRule =
                serde_yaml_ng::from_str("same_instant: \"2025-01-15T10:00:00Z\"").unwrap();
            assert_eq!(rule.same_instant.as_deref(), Some("2025-01-15T10:00:00Z"));
        }
    }

    mod sum_tests {
        use super::*;

        fn gap() -> Value {
            json!({"total_tasks": 10, "completed": 4, "in_progress": 3, "pending": 2})
        }

        fn parts() -> Vec<String> {
            vec!["/completed".into(), "/in_progress".into(), "/pending".into()]
        }

        #[test]
        fn test_sum_within_total() {
            assert!(check_sum_at_most(&gap(), &parts(), "/total_tasks").is_ok());
        }

        #[test]
        fn test_sum_exceeds_total() {
            let mut body = gap();
            body["pending"] = json!(5);
            let m = check_sum_at_most(&body, &parts(), "total_tasks").unwrap_err();
            assert_eq!(m.actual, "sum 12");
            assert_eq!(m.path, "/total_tasks");
        }

        #[test]
        fn test_sum_missing_part() {
            let m = check_sum_at_most(&json!({"total_tasks": 1}), &parts(), "/total_tasks")
                .unwrap_err();
            assert_eq!(m.path, "/completed");
        }
    }

    proptest! {
        #[test]
        fn prop_bounds_match_comparison(n in -1000i64..1000, lo in -500i64..0, hi in 0i64..500) {
            let rule = FieldRule::default().between(lo as f64, hi as f64);
            let ok = rule.check(Some(&json!(n)), "/n").is_ok();
            prop_assert_eq!(ok, n >= lo && n <= hi);
        }

        #[test]
        fn prop_sum_rule_matches_arithmetic(a in 0u32..100, b in 0u32..100, total in 0u32..250) {
            let body = json!({"a": a, "b": b, "t": total});
            let ok = check_sum_at_most(&body, &["a".to_string(), "b".to_string()], "t").is_ok();
            prop_assert_eq!(ok, a + b <= total);
        }
    }
}
