//! Typed argument values exchanged with task callbacks.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered field name → value mapping passed to and returned from callbacks.
pub type Args = IndexMap<String, TypedValue>;

/// Type tags accepted on the `{platformKey, value}` wire form.
pub const SUPPORTED_TAGS: &[&str] = &[
    "String",
    "int",
    "double",
    "bool",
    "List<String>",
    "List<int>",
    "List<double>",
    "List<bool>",
];

/// A value whose type is declared alongside its payload.
///
/// Serializes as `{"platformKey": "<tag>", "value": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platformKey", content = "value")]
pub enum TypedValue {
    #[serde(rename = "String")]
    String(String),
    #[serde(rename = "int")]
    Int(i64),
    #[serde(rename = "double")]
    Double(f64),
    #[serde(rename = "bool")]
    Bool(bool),
    #[serde(rename = "List<String>")]
    StringList(Vec<String>),
    #[serde(rename = "List<int>")]
    IntList(Vec<i64>),
    #[serde(rename = "List<double>")]
    DoubleList(Vec<f64>),
    #[serde(rename = "List<bool>")]
    BoolList(Vec<bool>),
}

impl TypedValue {
    /// The declared type tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::StringList(_) => "List<String>",
            Self::IntList(_) => "List<int>",
            Self::DoubleList(_) => "List<double>",
            Self::BoolList(_) => "List<bool>",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for TypedValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<String>> for TypedValue {
    fn from(v: Vec<String>) -> Self {
        Self::StringList(v)
    }
}

impl From<Vec<i64>> for TypedValue {
    fn from(v: Vec<i64>) -> Self {
        Self::IntList(v)
    }
}

impl From<Vec<f64>> for TypedValue {
    fn from(v: Vec<f64>) -> Self {
        Self::DoubleList(v)
    }
}

impl From<Vec<bool>> for TypedValue {
    fn from(v: Vec<bool>) -> Self {
        Self::BoolList(v)
    }
}
