//! The closed set of values that may cross the sandbox boundary.

use std::collections::BTreeMap;
use std::fmt;

use storage::ValueType;

/// A value exchanged between host and guest.
///
/// Every argument to and result from a host function, every global set on a
/// sandbox and every evaluation result is expressed in this type.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<ScriptValue>),
    Map(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The number as an integer, if it has no fractional part and fits.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            // i64::MAX as f64 rounds up to 2^63, hence the strict bound.
            Self::Number(n) if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n < i64::MAX as f64 => {
                Some(*n as i64)
            }
            _ => None,
        }
    }

    /// Render as JSON. Non-finite numbers become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Nil => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => match self.as_integer() {
                Some(i) => serde_json::Value::from(i),
                None => serde_json::Number::from_f64(*n)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
            },
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => items.iter().map(Self::to_json).collect(),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Look up a key of a map value.
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => match self.as_integer() {
                Some(i) => write!(f, "{i}"),
                None => write!(f, "{n}"),
            },
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for ScriptValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u16> for ScriptValue {
    fn from(n: u16) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<Vec<ScriptValue>> for ScriptValue {
    fn from(items: Vec<ScriptValue>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, ScriptValue>> for ScriptValue {
    fn from(map: BTreeMap<String, ScriptValue>) -> Self {
        Self::Map(map)
    }
}

/// Strict conversion from a guest value into a statically known host type.
///
/// Conversions never coerce across kinds: a string is not a number, and a
/// number with a fractional part is not an integer.
pub trait FromScriptValue: Sized {
    /// The declared type this conversion produces.
    const TYPE: ValueType;

    fn from_script_value(value: &ScriptValue) -> Option<Self>;
}

impl FromScriptValue for String {
    const TYPE: ValueType = ValueType::String;

    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromScriptValue for i64 {
    const TYPE: ValueType = ValueType::Int;

    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        value.as_integer()
    }
}

impl FromScriptValue for f64 {
    const TYPE: ValueType = ValueType::Float;

    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }
}

impl FromScriptValue for bool {
    const TYPE: ValueType = ValueType::Boolean;

    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}
