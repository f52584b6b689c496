//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The database file does not exist.
    ///
    /// This typically means no needle has been added yet.
    #[error("database not found at {path}. Run 'needle add' first")]
    DatabaseNotFound { path: PathBuf },

    /// No needle has the given name.
    #[error("no needle named '{name}'")]
    NeedleNotFound { name: String },

    /// A definition file could not be read as a needle.
    #[error("invalid needle definition in {}: {reason}", path.display())]
    InvalidDefinition { path: PathBuf, reason: String },

    /// A `--arg` or `--json` value is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    /// The MCP server stopped on a transport error.
    #[error(transparent)]
    Mcp(#[from] mcp::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
