//! Point types and the tagged values they carry.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of declared point types.
///
/// The serialized names are the tokens used in definition sources; the
/// long-form aliases are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum PointType {
    #[serde(rename = "int", alias = "integer")]
    Integer,
    #[serde(rename = "float", alias = "double")]
    Float,
    #[serde(rename = "bool", alias = "boolean")]
    Boolean,
    #[serde(rename = "string", alias = "str")]
    String,
}

impl PointType {
    /// Parse a type token from a definition source (case-insensitive).
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Some(PointType::Integer),
            "float" | "double" => Some(PointType::Float),
            "bool" | "boolean" => Some(PointType::Boolean),
            "str" | "string" => Some(PointType::String),
            _ => None,
        }
    }

    /// Canonical token, as written back to a definition source.
    pub fn as_str(self) -> &'static str {
        match self {
            PointType::Integer => "int",
            PointType::Float => "float",
            PointType::Boolean => "bool",
            PointType::String => "string",
        }
    }

    /// Integer and float points carry bounds and tolerance.
    pub fn is_numeric(self) -> bool {
        matches!(self, PointType::Integer | PointType::Float)
    }

    /// Zero value of the type, used when a definition declares no initial.
    pub fn zero(self) -> Value {
        match self {
            PointType::Integer => Value::Integer(0),
            PointType::Float => Value::Float(0.0),
            PointType::Boolean => Value::Boolean(false),
            PointType::String => Value::Text(String::new()),
        }
    }
}

impl fmt::Display for PointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed point value.
///
/// Serialized untagged so the structured definition form reads naturally
/// (`min = -1000`, `initial = true`). Variant order matters for
/// deserialization: integers are tried before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// The point type this value naturally belongs to.
    pub fn point_type(&self) -> PointType {
        match self {
            Value::Boolean(_) => PointType::Boolean,
            Value::Integer(_) => PointType::Integer,
            Value::Float(_) => PointType::Float,
            Value::Text(_) => PointType::String,
        }
    }

    /// Numeric view used for bounds and delta computation.
    ///
    /// Returns `None` for booleans and text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Boolean(_) | Value::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}
