//! Datum - the JSON-like value stored in record fields.
//!
//! A `Datum` is what a record holds for each of its fields and what a
//! filter condition compares against. It mirrors JSON: numbers keep their
//! exact JSON form, so large integer ids survive untouched, and objects are
//! kept sorted by key so that rasterized documents are reproducible.
//!
//! # Example
//!
//! ```rust
//! use hyperdoc::Datum;
//!
//! let title = Datum::from("Hello");
//! let tags = Datum::Array(vec![Datum::from("a"), Datum::from("b")]);
//! assert_eq!(title.as_string(), Some("Hello"));
//! assert_eq!(tags.as_array().map(|t| t.len()), Some(2));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A record field value or predicate operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Datum {
    #[default]
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    Array(Vec<Datum>),
    Object(BTreeMap<String, Datum>),
}

impl Datum {
    /// Check if datum is null
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Get as string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as number, widened to `f64`
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Datum::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Get as integer, if the number is one and fits
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&Vec<Datum>> {
        match self {
            Datum::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&BTreeMap<String, Datum>> {
        match self {
            Datum::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Render a scalar as the string form used for identifiers.
    ///
    /// Integers keep every digit. Whole floats lose their fractional part,
    /// so `7.0` becomes `"7"`.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Datum::String(s) => Some(s.clone()),
            Datum::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
            Datum::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some((f as i64).to_string()),
                _ => Some(n.to_string()),
            },
            Datum::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Total order used for sorting and range comparisons.
    ///
    /// Values of different kinds order as null < bool < number < string <
    /// array < object. Arrays and objects compare equal among themselves.
    pub fn compare(&self, other: &Datum) -> Ordering {
        let rank = |d: &Datum| -> u8 {
            match d {
                Datum::Null => 0,
                Datum::Boolean(_) => 1,
                Datum::Number(_) => 2,
                Datum::String(_) => 3,
                Datum::Array(_) => 4,
                Datum::Object(_) => 5,
            }
        };

        match (self, other) {
            (Datum::Boolean(a), Datum::Boolean(b)) => a.cmp(b),
            (Datum::Number(a), Datum::Number(b)) => compare_numbers(a, b).unwrap_or(Ordering::Equal),
            (Datum::String(a), Datum::String(b)) => a.cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

/// Order two JSON numbers, exactly when both are integers
pub fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    // a negative integer against one above i64::MAX
    if a.is_i64() && b.is_u64() {
        return Some(Ordering::Less);
    }
    if a.is_u64() && b.is_i64() {
        return Some(Ordering::Greater);
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Read a number out of text, integers first
pub fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Some(Number::from(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(Number::from(n));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

// Conversions
impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Boolean(b)
    }
}

impl From<i32> for Datum {
    fn from(n: i32) -> Self {
        Datum::Number(Number::from(n))
    }
}

impl From<i64> for Datum {
    fn from(n: i64) -> Self {
        Datum::Number(Number::from(n))
    }
}

impl From<u64> for Datum {
    fn from(n: u64) -> Self {
        Datum::Number(Number::from(n))
    }
}

/// NaN and infinities have no JSON form and become null
impl From<f64> for Datum {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Datum::Null, Datum::Number)
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::String(s)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::String(s.to_string())
    }
}

impl From<serde_json::Value> for Datum {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Datum::Null,
            serde_json::Value::Bool(b) => Datum::Boolean(b),
            serde_json::Value::Number(n) => Datum::Number(n),
            serde_json::Value::String(s) => Datum::String(s),
            serde_json::Value::Array(arr) => {
                Datum::Array(arr.into_iter().map(Datum::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Datum::Object(obj.into_iter().map(|(k, v)| (k, Datum::from(v))).collect())
            }
        }
    }
}

impl From<&Datum> for serde_json::Value {
    fn from(datum: &Datum) -> Self {
        match datum {
            Datum::Null => serde_json::Value::Null,
            Datum::Boolean(b) => serde_json::Value::Bool(*b),
            Datum::Number(n) => serde_json::Value::Number(n.clone()),
            Datum::String(s) => serde_json::Value::String(s.clone()),
            Datum::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(serde_json::Value::from).collect())
            }
            Datum::Object(obj) => serde_json::Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::Null => write!(f, "null"),
            Datum::Boolean(b) => write!(f, "{}", b),
            Datum::Number(n) => write!(f, "{}", n),
            Datum::String(s) => write!(f, "\"{}\"", s),
            Datum::Array(arr) => {
                write!(f, "[")?;
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Datum::Object(obj) => {
                write!(f, "{{")?;
                for (i, (key, value)) in obj.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}
