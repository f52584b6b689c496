//! Typed needle parameters and results.

use std::fmt;

use serde::{Deserialize, Serialize};
use storage::ValueType;

/// A host-typed argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ParamValue {
    String(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
}

impl ParamValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Boolean(_) => ValueType::Boolean,
        }
    }
}

/// A validated argument bound to a parameter name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedleParameter {
    pub name: String,
    pub value: ParamValue,
}

impl NeedleParameter {
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, ParamValue::String(value.into()))
    }

    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, ParamValue::Int(value))
    }

    pub fn float(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, ParamValue::Float(value))
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, ParamValue::Boolean(value))
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }
}

/// The typed outcome of one needle execution.
///
/// The variant always matches the needle's declared return type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NeedleResult {
    String(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
}

impl NeedleResult {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Boolean(_) => ValueType::Boolean,
        }
    }

    /// The result as a JSON scalar.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for NeedleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}
