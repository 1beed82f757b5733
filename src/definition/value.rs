use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Typed value held in a variable store, produced by expressions and recorded in traces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Value {
    /// Signed integer.
    Integer(i64),
    /// UTF-8 string.
    String(String),
    /// Non-negative time quantity.
    Duration(Duration),
}

/// Static type tag used for parameter declarations and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    /// `int`
    Integer,
    /// `string`
    String,
    /// `duration`
    Duration,
}

impl Value {
    /// Type tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::String(_) => ValueType::String,
            Value::Duration(_) => ValueType::Duration,
        }
    }

    /// Integer payload, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(num) => Some(*num),
            _ => None,
        }
    }

    /// String payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Duration payload, if this is a duration.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Value::Duration(duration) => Some(*duration),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(num) => write!(f, "{}", num),
            Value::String(text) => f.write_str(text),
            Value::Duration(duration) => write!(f, "{}ms", duration.as_millis()),
        }
    }
}

impl ValueType {
    /// Parse a type name as written in workflow sources.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" | "integer" => Some(ValueType::Integer),
            "string" | "str" => Some(ValueType::String),
            "duration" => Some(ValueType::Duration),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Integer => "int",
            ValueType::String => "string",
            ValueType::Duration => "duration",
        };
        f.write_str(name)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Value::Duration(value)
    }
}
