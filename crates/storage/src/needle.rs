//! The Needle record: a named, typed tool definition.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// A unique identifier for a needle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeedleId(pub Uuid);

impl NeedleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NeedleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NeedleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NeedleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The declared type of an argument or of a needle's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Int,
    Float,
    Boolean,
}

impl ValueType {
    /// Name used in JSON Schema documents.
    pub fn json_schema_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "String",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
        };
        f.write_str(name)
    }
}

/// A declared needle argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arg {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Guest-syntax literal bound when the argument is omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Arg {
    /// A required argument.
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            description: String::new(),
            required: true,
            default_value: None,
        }
    }

    /// An optional argument, bound to `default_value` (if any) when omitted.
    pub fn optional(
        name: impl Into<String>,
        value_type: ValueType,
        default_value: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            value_type,
            description: String::new(),
            required: false,
            default_value: default_value.map(str::to_string),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A tool definition: typed arguments, a return type and a Lua body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Needle {
    pub id: NeedleId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub code: String,
    #[serde(default)]
    pub args: Vec<Arg>,
    pub return_type: ValueType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Needle {
    pub fn new(name: impl Into<String>, code: impl Into<String>, return_type: ValueType) -> Self {
        let now = Utc::now();
        Self {
            id: NeedleId::new(),
            name: name.into(),
            description: String::new(),
            code: code.into(),
            args: Vec::new(),
            return_type,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    /// Look up an argument definition by name.
    pub fn arg(&self, name: &str) -> Option<&Arg> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Check the structural invariants of the definition.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidNeedle("name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for arg in &self.args {
            if arg.name.is_empty() {
                return Err(Error::InvalidNeedle(format!(
                    "needle '{}' has an argument with an empty name",
                    self.name
                )));
            }
            if !seen.insert(arg.name.as_str()) {
                return Err(Error::InvalidNeedle(format!(
                    "needle '{}' declares argument '{}' more than once",
                    self.name, arg.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adder() -> Needle {
        Needle::new("add", "return a + b", ValueType::Int)
            .with_description("Add two integers")
            .with_arg(Arg::required("a", ValueType::Int))
            .with_arg(Arg::optional("b", ValueType::Int, Some("0")).with_description("addend"))
    }

    #[test]
    fn external_schema_field_names() {
        let json = serde_json::to_value(adder()).unwrap();
        assert!(json.get("returnType").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json["args"][0]["type"], "Int");
        assert_eq!(json["args"][1]["defaultValue"], "0");
        assert!(json["args"][0].get("defaultValue").is_none());
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let needle = adder();
        let json = serde_json::to_string(&needle).unwrap();
        let back: Needle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, needle);
    }

    #[test]
    fn parses_external_record() {
        let json = r#"{
            "id": "6f1c1f57-2c4a-4a39-9f57-0a3e7b6e6c11",
            "name": "greet",
            "description": "Say hello",
            "code": "return 'hi ' .. who",
            "args": [{"name": "who", "type": "String", "description": "", "required": true}],
            "returnType": "String",
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-02T10:00:00Z"
        }"#;
        let needle: Needle = serde_json::from_str(json).unwrap();
        assert_eq!(needle.return_type, ValueType::String);
        assert_eq!(needle.args[0].value_type, ValueType::String);
        assert!(needle.args[0].default_value.is_none());
        assert_eq!(
            needle.id,
            "6f1c1f57-2c4a-4a39-9f57-0a3e7b6e6c11".parse().unwrap()
        );
    }

    #[test]
    fn rejects_duplicate_arguments() {
        let needle = adder().with_arg(Arg::required("a", ValueType::String));
        assert!(matches!(needle.validate(), Err(Error::InvalidNeedle(_))));
    }

    #[test]
    fn rejects_empty_names() {
        let needle = Needle::new(" ", "return 1", ValueType::Int);
        assert!(needle.validate().is_err());

        let needle = Needle::new("x", "return 1", ValueType::Int)
            .with_arg(Arg::required("", ValueType::Int));
        assert!(needle.validate().is_err());
    }
}
