//! Describing a needle as a callable tool.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use storage::Needle;

/// A needle as advertised to a tool-calling client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema object for the arguments.
    pub input_schema: Value,
}

impl From<&Needle> for ToolSpec {
    fn from(needle: &Needle) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for arg in &needle.args {
            let mut property = Map::new();
            property.insert("type".into(), json!(arg.value_type.json_schema_type()));
            if !arg.description.is_empty() {
                property.insert("description".into(), json!(arg.description));
            }
            // Defaults are Lua literals; only the ones that read as JSON are advertised.
            if let Some(default) = arg
                .default_value
                .as_deref()
                .and_then(|literal| serde_json::from_str::<Value>(literal).ok())
            {
                property.insert("default".into(), default);
            }
            properties.insert(arg.name.clone(), Value::Object(property));

            if arg.required {
                required.push(json!(arg.name));
            }
        }

        Self {
            name: needle.name.clone(),
            description: needle.description.clone(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}
