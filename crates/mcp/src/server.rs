//! MCP tool server: stored needles exposed over newline-delimited JSON-RPC.

use runtime::{NeedleExecutor, ToolSpec};
use serde_json::{Map, Value};
use storage::NeedleStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult,
};

/// Maximum request line size (1MB).
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Serves every needle in a store as an MCP tool.
///
/// Requests are handled one at a time in arrival order. The store is read
/// on each `tools/list` and `tools/call`, so needles added while serving
/// show up without a restart.
pub struct ToolServer {
    store: Mutex<NeedleStore>,
    executor: NeedleExecutor,
}

/// Outcome of reading one line.
enum Line {
    Complete,
    TooLong,
    Eof,
}

impl ToolServer {
    pub fn new(store: NeedleStore, executor: NeedleExecutor) -> Self {
        Self {
            store: Mutex::new(store),
            executor,
        }
    }

    /// Serve on the process's stdin and stdout until stdin closes.
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve requests from `reader`, writing responses to `writer`, until
    /// the reader is exhausted.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!("mcp server started");
        let mut buf = Vec::new();

        loop {
            let response = match read_line(&mut reader, &mut buf).await? {
                Line::Eof => break,
                Line::TooLong => {
                    tracing::warn!(max = MAX_LINE_SIZE, "rejecting oversized request");
                    Some(JsonRpcResponse::failure(
                        None,
                        JsonRpcError::invalid_request(format!(
                            "request exceeds {MAX_LINE_SIZE} bytes"
                        )),
                    ))
                }
                Line::Complete => {
                    let line = String::from_utf8_lossy(&buf);
                    self.handle_line(&line).await
                }
            };

            if let Some(response) = response {
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                writer.write_all(&out).await?;
                writer.flush().await?;
            }
        }

        tracing::info!("mcp server stopped: input closed");
        Ok(())
    }

    /// Handle one raw request line. Returns `None` for notifications and
    /// blank lines.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => return Some(JsonRpcResponse::failure(None, JsonRpcError::parse_error(e))),
        };
        let id = value.get("id").cloned().and_then(|id| serde_json::from_value(id).ok());
        let request = match JsonRpcRequest::from_value(value) {
            Ok(request) => request,
            Err(error) => return Some(JsonRpcResponse::failure(id, error)),
        };

        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification");
            return None;
        }

        tracing::debug!(method = %request.method, id = ?request.id, "request");
        let response = match self.dispatch(&request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => {
                tracing::warn!(method = %request.method, %error, "request failed");
                JsonRpcResponse::failure(request.id, error)
            }
        };
        Some(response)
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        match method {
            "initialize" => {
                let params: InitializeParams = parse_params(params)?;
                if let Some(client) = &params.client_info {
                    tracing::info!(
                        client = %client.name,
                        version = client.version.as_deref().unwrap_or("unknown"),
                        requested = params.protocol_version.as_deref().unwrap_or("unknown"),
                        "client connected"
                    );
                }
                to_value(InitializeResult::default())
            }
            "ping" => Ok(Value::Object(Map::new())),
            "tools/list" => {
                let needles = self.store.lock().await.list().map_err(JsonRpcError::internal)?;
                let tools = needles.iter().map(ToolSpec::from).collect();
                to_value(ListToolsResult { tools })
            }
            "tools/call" => {
                let params: CallToolParams = match params {
                    Some(params) => {
                        serde_json::from_value(params).map_err(JsonRpcError::invalid_params)?
                    }
                    None => return Err(JsonRpcError::invalid_params("missing params")),
                };
                to_value(self.call_tool(params).await?)
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    async fn call_tool(
        &self,
        params: CallToolParams,
    ) -> std::result::Result<CallToolResult, JsonRpcError> {
        let needle = self
            .store
            .lock()
            .await
            .find_by_name(&params.name)
            .map_err(JsonRpcError::internal)?
            .ok_or_else(|| JsonRpcError::invalid_params(format!("unknown tool: {}", params.name)))?;

        let arguments = params.arguments.unwrap_or_default();
        match self.executor.execute_json(&arguments, &needle).await {
            Ok(result) => Ok(CallToolResult::text(result.to_string())),
            Err(e) => Ok(CallToolResult::error(e.to_string())),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned + Default>(
    params: Option<Value>,
) -> std::result::Result<T, JsonRpcError> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(params) => serde_json::from_value(params).map_err(JsonRpcError::invalid_params),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(JsonRpcError::internal)
}

/// Read one `\n`-terminated line into `buf`, without the terminator,
/// discarding (but consuming) lines longer than [`MAX_LINE_SIZE`].
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Line> {
    buf.clear();
    let mut too_long = false;
    let mut seen_any = false;

    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(match (seen_any, too_long) {
                    (false, _) => Line::Eof,
                    (true, true) => Line::TooLong,
                    (true, false) => Line::Complete,
                });
            }
            seen_any = true;

            let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
                Some(end) => (&available[..end], true),
                None => (available, false),
            };
            if !too_long {
                if buf.len() + chunk.len() > MAX_LINE_SIZE {
                    too_long = true;
                    buf.clear();
                } else {
                    buf.extend_from_slice(chunk);
                }
            }
            (chunk.len() + usize::from(done), done)
        };
        reader.consume(used);

        if done {
            return Ok(if too_long { Line::TooLong } else { Line::Complete });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use serde_json::json;
    use storage::{Arg, Needle, ValueType};

    fn server() -> ToolServer {
        let store = NeedleStore::in_memory().unwrap();
        store
            .save(
                &Needle::new("add", "return a + b", ValueType::Int)
                    .with_description("Add two integers")
                    .with_arg(Arg::required("a", ValueType::Int))
                    .with_arg(Arg::required("b", ValueType::Int)),
            )
            .unwrap();
        ToolServer::new(store, NeedleExecutor::builder().build())
    }

    async fn call(server: &ToolServer, request: Value) -> JsonRpcResponse {
        server
            .handle_line(&request.to_string())
            .await
            .expect("request should get a response")
    }

    #[tokio::test]
    async fn initialize_and_ping() {
        let server = server();
        let init = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.1"}
            }}),
        )
        .await;
        let result = init.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert!(result["capabilities"]["tools"].is_object());

        let pong = call(&server, json!({"jsonrpc": "2.0", "id": "p", "method": "ping"})).await;
        assert_eq!(pong.id, Some(RequestId::from("p")));
        assert_eq!(pong.result, Some(json!({})));
    }

    #[tokio::test]
    async fn notifications_and_blank_lines_are_silent() {
        let server = server();
        let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(server.handle_line(&note.to_string()).await.is_none());
        assert!(server.handle_line("   ").await.is_none());
    }

    #[tokio::test]
    async fn tools_list_describes_needles() {
        let server = server();
        let response = call(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
        let tools = &response.result.unwrap()["tools"];
        assert_eq!(tools[0]["name"], "add");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn tools_call_success_and_failure() {
        let server = server();
        let ok = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
                   "params": {"name": "add", "arguments": {"a": 10, "b": 32}}}),
        )
        .await;
        assert_eq!(
            ok.result.unwrap(),
            json!({"content": [{"type": "text", "text": "42"}], "isError": false})
        );

        let failed = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call",
                   "params": {"name": "add", "arguments": {"a": 10}}}),
        )
        .await;
        let result = failed.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("missing required argument: b"));
    }

    #[tokio::test]
    async fn protocol_errors() {
        let server = server();

        let parse = server.handle_line("{not json").await.unwrap();
        assert_eq!(parse.error.unwrap().code, JsonRpcError::PARSE_ERROR);

        let unknown = call(&server, json!({"jsonrpc": "2.0", "id": 5, "method": "resources/list"})).await;
        assert_eq!(unknown.id, Some(RequestId::Number(5)));
        assert_eq!(unknown.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);

        let no_tool = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call", "params": {"name": "nope"}}),
        )
        .await;
        let error = no_tool.error.unwrap();
        assert_eq!(error.code, JsonRpcError::INVALID_PARAMS);
        assert!(error.message.contains("unknown tool: nope"));

        let bad_params = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call", "params": {"arguments": {}}}),
        )
        .await;
        assert_eq!(bad_params.error.unwrap().code, JsonRpcError::INVALID_PARAMS);

        let no_method = call(&server, json!({"jsonrpc": "2.0", "id": 8})).await;
        assert_eq!(no_method.id, Some(RequestId::Number(8)));
        assert_eq!(no_method.error.unwrap().code, JsonRpcError::INVALID_REQUEST);

        let null_id = server
            .handle_line(r#"{"jsonrpc": "2.0", "id": null, "method": "ping"}"#)
            .await
            .expect("a null id still gets a response");
        assert_eq!(null_id.id, None);
        assert_eq!(null_id.error.unwrap().code, JsonRpcError::INVALID_REQUEST);

        let old_version = call(&server, json!({"jsonrpc": "1.0", "id": 9, "method": "ping"})).await;
        assert_eq!(old_version.id, Some(RequestId::Number(9)));
        assert_eq!(old_version.error.unwrap().code, JsonRpcError::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn read_line_limits_size() {
        let mut input = vec![b'x'; MAX_LINE_SIZE + 10];
        input.extend_from_slice(b"\nshort\nlast");
        let mut reader = &input[..];
        let mut buf = Vec::new();

        assert!(matches!(read_line(&mut reader, &mut buf).await.unwrap(), Line::TooLong));
        assert!(matches!(read_line(&mut reader, &mut buf).await.unwrap(), Line::Complete));
        assert_eq!(buf, b"short");
        assert!(matches!(read_line(&mut reader, &mut buf).await.unwrap(), Line::Complete));
        assert_eq!(buf, b"last");
        assert!(matches!(read_line(&mut reader, &mut buf).await.unwrap(), Line::Eof));
    }
}
