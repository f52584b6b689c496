//! MCP (Model Context Protocol) tool server.
//!
//! Every needle in a [`NeedleStore`](storage::NeedleStore) is offered as an
//! MCP tool. Requests arrive as newline-delimited JSON-RPC 2.0, normally on
//! stdio; `tools/call` runs the needle through a
//! [`NeedleExecutor`](runtime::NeedleExecutor).
//!
//! # Example
//!
//! ```no_run
//! use mcp::ToolServer;
//! use runtime::{LogModule, NeedleExecutor};
//! use storage::NeedleStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = NeedleStore::open("needles.db")?;
//! let executor = NeedleExecutor::builder()
//!     .capability(LogModule::tracing())
//!     .build();
//!
//! ToolServer::new(store, executor).serve_stdio().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod server;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, ClientInfo, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, RequestId,
    ServerCapabilities, ServerInfo, ToolContent, ToolsCapability,
};
pub use server::{MAX_LINE_SIZE, ToolServer};
