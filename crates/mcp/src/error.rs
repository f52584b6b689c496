//! MCP server error types.
//!
//! Only transport failures end a session. Protocol-level problems are
//! answered with a [`JsonRpcError`](crate::JsonRpcError) instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
