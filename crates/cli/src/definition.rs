//! Needle definition files (`needle add`).
//!
//! A definition is the authored part of a needle, without id or
//! timestamps, in TOML or JSON:
//!
//! ```toml
//! name = "add"
//! description = "Add two integers"
//! return_type = "Int"
//! code = "return a + b"
//!
//! [[args]]
//! name = "a"
//! type = "Int"
//!
//! [[args]]
//! name = "b"
//! type = "Int"
//! required = false
//! defaultValue = "0"
//! ```

use std::path::Path;

use serde::Deserialize;
use storage::{Arg, Needle, ValueType};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub code: String,
    #[serde(default)]
    pub args: Vec<Arg>,
    #[serde(alias = "return_type")]
    pub return_type: ValueType,
}

impl Definition {
    /// Read a definition; `.json` files are JSON, anything else TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let invalid = |reason: String| Error::InvalidDefinition {
            path: path.to_path_buf(),
            reason,
        };

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| invalid(e.to_string()))
        }
    }

    /// Apply this definition on top of `existing`, or create a new needle.
    ///
    /// Updating keeps the id and creation time.
    pub fn into_needle(self, existing: Option<Needle>) -> Needle {
        let mut needle = match existing {
            Some(mut needle) => {
                needle.code = self.code;
                needle.return_type = self.return_type;
                needle.updated_at = chrono::Utc::now();
                needle
            }
            None => Needle::new(self.name, self.code, self.return_type),
        };
        needle.description = self.description;
        needle.args = self.args;
        needle
    }
}
