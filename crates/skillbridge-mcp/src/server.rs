//! MCP server over STDIO
//!
//! Reads JSON-RPC requests line by line, dispatches `tools/*` to a
//! [`ToolRegistry`], writes responses. Holds no state between calls.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use skillbridge_core::ToolRegistry;

use crate::protocol::*;
use crate::transport::snippet;

pub struct McpServer {
    registry: Arc<ToolRegistry>,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
        }
    }

    /// Serve on the process's stdin/stdout until stdin closes
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("MCP server '{}' starting on STDIO", self.info.name);
        self.serve(io::stdin(), io::stdout()).await
    }

    /// Serve on any reader/writer pair until the reader hits end-of-input
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            debug!("MCP received: {}", snippet(&line));

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Invalid JSON-RPC request: {}", e);
                    let err_response =
                        JsonRpcResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {}", e));
                    write_response(&mut writer, &err_response).await?;
                    continue;
                }
            };

            if let Some(resp) = self.handle_request(request).await {
                write_response(&mut writer, &resp).await?;
            }
        }

        info!("MCP server '{}' input closed, shutting down", self.info.name);
        Ok(())
    }

    /// Handle a single JSON-RPC request; notifications yield `None`
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: ToolsCapability { list_changed: false },
                    },
                    server_info: self.info.clone(),
                };
                Some(match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
                })
            }

            "notifications/initialized" => {
                info!("MCP client initialized");
                None
            }

            "tools/list" => {
                let tools = self.registry.list_tools();
                info!("MCP tools/list: returning {} tools", tools.len());
                Some(JsonRpcResponse::success(
                    id,
                    serde_json::json!({ "tools": tools }),
                ))
            }

            "tools/call" => {
                let name = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or(serde_json::json!({}));

                if name.is_empty() {
                    return Some(JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        "Missing 'name' parameter".to_string(),
                    ));
                }
                if self.registry.get(name).is_none() {
                    return Some(JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        format!("Unknown tool: {}", name),
                    ));
                }

                info!("MCP tools/call: {}", name);
                let result = match self.registry.execute(name, arguments).await {
                    Ok(payload) => ToolCallResult::success(payload),
                    Err(e) => ToolCallResult::failure(e.to_string()),
                };
                Some(match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
                })
            }

            "ping" => Some(JsonRpcResponse::success(id, serde_json::json!({}))),

            _ => {
                warn!("MCP unknown method: {}", request.method);
                // Notifications (no id) never get error responses
                request.id.as_ref()?;
                Some(JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Unknown method: {}", request.method),
                ))
            }
        }
    }
}

/// Write one newline-delimited response
async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &JsonRpcResponse,
) -> Result<()> {
    let json = serde_json::to_string(response).context("Failed to serialize response")?;
    debug!("MCP sending: {}", snippet(&json));
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use skillbridge_core::{ToolHandler, json_schema};
    use std::time::Duration;
    use tokio::io::duplex;

    use crate::transport::RpcTransport;

    struct QuoteTool;

    #[async_trait]
    impl ToolHandler for QuoteTool {
        fn name(&self) -> &str {
            "quote"
        }
        fn description(&self) -> &str {
            "Fixed quote"
        }
        fn input_schema(&self) -> Value {
            json_schema(serde_json::json!({"symbol": {"type": "string"}}), vec!["symbol"])
        }
        async fn execute(&self, input: Value) -> Result<Value> {
            match input["symbol"].as_str() {
                Some("ZZZZ") => Err(anyhow!("Symbol 'ZZZZ' not found")),
                Some(symbol) => Ok(serde_json::json!({"symbol": symbol, "price": 1.25})),
                None => Err(anyhow!("missing symbol")),
            }
        }
    }

    fn make_server() -> McpServer {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(QuoteTool));
        McpServer::new("test-server", "0.0.1", Arc::new(registry))
    }

    fn request(id: Option<i64>, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: id.map(|i| serde_json::json!(i)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_handle_initialize() {
        let server = make_server();
        let resp = server
            .handle_request(request(Some(1), "initialize", serde_json::json!({})))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "test-server");
    }

    #[tokio::test]
    async fn test_handle_tools_list() {
        let server = make_server();
        let resp = server
            .handle_request(request(Some(2), "tools/list", serde_json::json!({})))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["tools"][0]["name"], "quote");
        assert_eq!(result["tools"][0]["inputSchema"]["required"][0], "symbol");
    }

    #[tokio::test]
    async fn test_handle_tools_call_success() {
        let server = make_server();
        let resp = server
            .handle_request(request(
                Some(3),
                "tools/call",
                serde_json::json!({"name": "quote", "arguments": {"symbol": "MSFT"}}),
            ))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["structuredContent"]["symbol"], "MSFT");
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn test_handle_tools_call_business_error() {
        let server = make_server();
        let resp = server
            .handle_request(request(
                Some(4),
                "tools/call",
                serde_json::json!({"name": "quote", "arguments": {"symbol": "ZZZZ"}}),
            ))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("ZZZZ"));
    }

    #[tokio::test]
    async fn test_handle_tools_call_missing_name() {
        let server = make_server();
        let resp = server
            .handle_request(request(Some(5), "tools/call", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_handle_tools_call_unknown_tool() {
        let server = make_server();
        let resp = server
            .handle_request(request(
                Some(6),
                "tools/call",
                serde_json::json!({"name": "nope"}),
            ))
            .await
            .unwrap();
        assert!(resp.error.unwrap().message.contains("nope"));
    }

    #[tokio::test]
    async fn test_handle_unknown_method() {
        let server = make_server();
        let resp = server
            .handle_request(request(Some(7), "resources/list", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let server = make_server();
        assert!(
            server
                .handle_request(request(None, "notifications/initialized", Value::Null))
                .await
                .is_none()
        );
        assert!(
            server
                .handle_request(request(None, "notifications/cancelled", Value::Null))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_serve_against_transport() {
        let (client_out, server_in) = duplex(64 * 1024);
        let (server_out, client_in) = duplex(64 * 1024);
        let server = tokio::spawn(async move { make_server().serve(server_in, server_out).await });

        let mut transport = RpcTransport::new(client_in, client_out);
        let timeout = Duration::from_secs(2);
        transport
            .request("initialize", serde_json::json!({}), timeout)
            .await
            .unwrap();
        transport
            .notify("notifications/initialized", serde_json::json!({}))
            .await
            .unwrap();
        let listed = transport
            .request("tools/list", serde_json::json!({}), timeout)
            .await
            .unwrap();
        assert_eq!(listed["tools"].as_array().unwrap().len(), 1);
        let called = transport
            .request(
                "tools/call",
                serde_json::json!({"name": "quote", "arguments": {"symbol": "AAPL"}}),
                timeout,
            )
            .await
            .unwrap();
        let payload = crate::invoker::parse_tool_result(called).unwrap();
        assert_eq!(payload["symbol"], "AAPL");

        transport.close_writer();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_reports_parse_errors() {
        let (mut client_out, server_in) = duplex(4096);
        let (server_out, client_in) = duplex(4096);
        let server = tokio::spawn(async move { make_server().serve(server_in, server_out).await });

        client_out.write_all(b"{not json\n").await.unwrap();
        drop(client_out);

        let mut lines = BufReader::new(client_in).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let resp: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(resp["error"]["code"], PARSE_ERROR);
        assert!(resp["id"].is_null());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_debug_logging_multibyte_request() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        // Pad so that 'é' spans bytes 199..201 of the request line
        let prefix = r#"{"jsonrpc":"2.0","id":9,"method":"ping","params":{"note":""#;
        let pad = "x".repeat(199 - prefix.len());
        let line = format!("{prefix}{pad}é\"}}}}\n");
        assert!(!line.is_char_boundary(200));

        let (mut client_out, server_in) = duplex(4096);
        let (server_out, client_in) = duplex(4096);
        let server = make_server();
        let serving = server.serve(server_in, server_out);

        let exchange = async move {
            client_out.write_all(line.as_bytes()).await.unwrap();
            drop(client_out);
            let mut lines = BufReader::new(client_in).lines();
            lines.next_line().await.unwrap().unwrap()
        };
        let (served, reply) = tokio::join!(serving, exchange);
        served.unwrap();

        let resp: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(resp["id"], 9);
        assert!(resp.get("error").is_none());
    }
}
