/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template value type.
//!
//! [`Value`] is the dynamic type that flows through expression evaluation,
//! filter chains and rendering. It is independent of any serialization
//! format; conversion from `serde_json::Value` is provided for callers that
//! already hold JSON data.

use std::collections::BTreeMap;
use std::fmt;

/// A value usable in template evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A null/missing value.
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A string.
    Str(String),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A key-value mapping. Ordered so that iteration is deterministic.
    Map(BTreeMap<String, Value>),
    /// A string that has already been escaped (or declared safe) and must
    /// not be escaped again.
    Safe(String),
}

impl Value {
    /// Check whether this value is "truthy" for conditional evaluation.
    ///
    /// Empty strings, zero numbers, empty lists and empty maps are falsy;
    /// everything else (other than `Null` and `false`) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Safe(s) => !s.is_empty(),
        }
    }

    /// Render this value as output text.
    ///
    /// - `Null` renders as the empty string
    /// - lists render as the concatenation of their rendered elements
    /// - maps render their values in key order
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => s.clone(),
            Value::List(items) => items.iter().map(|v| v.render()).collect(),
            Value::Map(m) => m.values().map(|v| v.render()).collect(),
            Value::Safe(s) => s.clone(),
        }
    }

    /// Look up a key on a map value. Non-map values have no keys.
    pub fn get_key(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Look up an element by index on a list value.
    pub fn get_index(&self, index: i64) -> Option<&Value> {
        match self {
            Value::List(items) => {
                let i = if index < 0 {
                    items.len().checked_sub(index.unsigned_abs() as usize)?
                } else {
                    index as usize
                };
                items.get(i)
            }
            _ => None,
        }
    }

    /// The number of elements: list length, map size, string characters.
    pub fn len(&self) -> usize {
        match self {
            Value::List(items) => items.len(),
            Value::Map(m) => m.len(),
            Value::Str(s) | Value::Safe(s) => s.chars().count(),
            _ => 0,
        }
    }

    /// True when [`Value::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of this value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// True when this value carries the safe-string marker.
    pub fn is_safe(&self) -> bool {
        matches!(self, Value::Safe(_))
    }

    /// Loose equality used by the `==` operator: integers and floats
    /// compare numerically, everything else compares structurally.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Safe(a), Value::Str(b)) | (Value::Str(a), Value::Safe(b)) => a == b,
            (a, b) => a == b,
        }
    }

    /// Ordering used by the comparison operators. Numbers compare
    /// numerically, strings lexicographically; mixed types do not compare.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) => {
                let (a, b) = (a.as_f64()?, b.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }

    /// Membership test used by the `in` operator: list containment, map
    /// key presence, or substring match.
    pub fn contains(&self, needle: &Value) -> bool {
        match self {
            Value::List(items) => items.iter().any(|v| v.loose_eq(needle)),
            Value::Map(m) => match needle {
                Value::Str(s) | Value::Safe(s) => m.contains_key(s),
                _ => false,
            },
            Value::Str(s) | Value::Safe(s) => match needle {
                Value::Str(n) | Value::Safe(n) => s.contains(n.as_str()),
                _ => false,
            },
            _ => false,
        }
    }
}

/// Render a float the way templates expect: integral values print without
/// a trailing `.0`.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(m) => {
                Value::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(n) => serde_json::Value::Number(n.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) | Value::Safe(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(m) => serde_json::Value::Object(
                m.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Null.is_truthy());

        assert!(Value::Str("hello".to_string()).is_truthy());
        assert!(Value::Str("false".to_string()).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());

        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Int(0).is_truthy());

        assert!(Value::List(vec![Value::Null]).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Map(BTreeMap::new()).is_truthy());
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::Null.render(), "");
        assert_eq!(Value::Bool(true).render(), "true");
        assert_eq!(Value::Int(42).render(), "42");
        assert_eq!(Value::Float(2.5).render(), "2.5");
        assert_eq!(Value::Float(3.0).render(), "3");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Int(2)]).render(),
            "12"
        );
    }

    #[test]
    fn test_get_index_negative() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list.get_index(0), Some(&Value::Int(1)));
        assert_eq!(list.get_index(-1), Some(&Value::Int(3)));
        assert_eq!(list.get_index(3), None);
    }

    #[test]
    fn test_loose_eq() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(Value::Str("a".to_string()).loose_eq(&Value::Safe("a".to_string())));
        assert!(!Value::Int(1).loose_eq(&Value::Str("1".to_string())));
    }

    #[test]
    fn test_contains() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert!(list.contains(&Value::Int(2)));
        assert!(!list.contains(&Value::Int(3)));

        let mut m = BTreeMap::new();
        m.insert("key".to_string(), Value::Null);
        assert!(Value::Map(m).contains(&Value::Str("key".to_string())));

        assert!(Value::Str("hello".to_string()).contains(&Value::Str("ell".to_string())));
    }

    #[test]
    fn test_from_json() {
        let json: serde_json::Value = serde_json::json!({
            "name": "world",
            "count": 3,
            "tags": ["a", "b"],
        });
        let value = Value::from(json);
        assert_eq!(
            value.get_key("name"),
            Some(&Value::Str("world".to_string()))
        );
        assert_eq!(value.get_key("count"), Some(&Value::Int(3)));
        assert_eq!(value.get_key("tags").map(|v| v.len()), Some(2));
    }
}
