//! Typed tool invocation over an open [`StdioChannel`]

use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::channel::StdioChannel;
use crate::error::McpError;
use crate::protocol::{ToolCallResult, ToolDescriptor};

/// Borrows a channel for the duration of a tool exchange
pub struct ToolClient<'c> {
    channel: &'c mut StdioChannel,
}

impl<'c> ToolClient<'c> {
    pub fn new(channel: &'c mut StdioChannel) -> Self {
        Self { channel }
    }

    /// Tools advertised at handshake (no round trip)
    pub fn list_tools(&self) -> &[ToolDescriptor] {
        self.channel.tools()
    }

    /// Call `name` with `arguments` and return its structured result.
    ///
    /// Fails fast with [`McpError::UnknownTool`] when `name` was not advertised.
    pub async fn invoke(
        &mut self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Map<String, Value>, McpError> {
        if !self.list_tools().iter().any(|t| t.name == name) {
            let advertised = self
                .list_tools()
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(McpError::UnknownTool {
                name: name.to_string(),
                advertised,
            });
        }

        info!("Invoking tool '{}' on '{}'", name, self.channel.name());
        debug!("Tool '{}' arguments: {}", name, arguments);

        let raw = self
            .channel
            .call(
                "tools/call",
                serde_json::json!({
                    "name": name,
                    "arguments": arguments,
                }),
                timeout,
            )
            .await?;

        parse_tool_result(raw)
    }
}

/// Turn a `tools/call` result into a structured payload or a [`McpError::ToolFault`]
pub fn parse_tool_result(raw: Value) -> Result<Map<String, Value>, McpError> {
    let result: ToolCallResult = serde_json::from_value(raw)
        .map_err(|e| McpError::Protocol(format!("malformed tools/call result: {e}")))?;

    if result.is_error.unwrap_or(false) {
        let message = result
            .first_text()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("tool reported an error without details")
            .to_string();
        warn!("Tool reported an error: {}", message);
        return Err(McpError::ToolFault(message));
    }

    let payload = match result.structured_content {
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(McpError::Protocol(format!(
                "structuredContent is not an object: {other}"
            )));
        }
        None => {
            let text = result.first_text().ok_or_else(|| {
                McpError::Protocol("tool result has no text content".to_string())
            })?;
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(McpError::Protocol(
                        "tool result text is not a JSON object".to_string(),
                    ));
                }
                Err(_) => {
                    return Err(McpError::Protocol(
                        "tool result text is not JSON".to_string(),
                    ));
                }
            }
        }
    };

    // Tools that report failures inside a successful result
    if let Some(error) = payload.get("error") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(McpError::ToolFault(message));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_content_wins() {
        let raw = serde_json::json!({
            "content": [{"type": "text", "text": "ignored"}],
            "structuredContent": {"symbol": "MSFT", "price": 410.5, "currency": "USD"}
        });
        let payload = parse_tool_result(raw).unwrap();
        assert_eq!(payload["symbol"], "MSFT");
        assert_eq!(payload["currency"], "USD");
    }

    #[test]
    fn test_json_text_fallback() {
        let raw = serde_json::json!({
            "content": [{"type": "text", "text": "{\"price\": 12.5, \"currency\": \"EUR\"}"}]
        });
        let payload = parse_tool_result(raw).unwrap();
        assert_eq!(payload["price"], 12.5);
    }

    #[test]
    fn test_is_error_is_tool_fault() {
        let raw = serde_json::json!({
            "content": [{"type": "text", "text": "Symbol 'ZZZZ' not found"}],
            "isError": true
        });
        let err = parse_tool_result(raw).unwrap_err();
        assert_eq!(err.kind(), "ToolFault");
        assert!(err.to_string().contains("ZZZZ"));
    }

    #[test]
    fn test_error_field_is_tool_fault() {
        let raw = serde_json::json!({
            "content": [{"type": "text", "text": "{\"error\": \"Could not retrieve price\"}"}]
        });
        let err = parse_tool_result(raw).unwrap_err();
        assert!(matches!(err, McpError::ToolFault(ref m) if m == "Could not retrieve price"));
    }

    #[test]
    fn test_plain_text_is_protocol_error() {
        let raw = serde_json::json!({
            "content": [{"type": "text", "text": "the price is 12"}]
        });
        assert_eq!(parse_tool_result(raw).unwrap_err().kind(), "ProtocolError");
    }

    #[test]
    fn test_empty_content_is_protocol_error() {
        let raw = serde_json::json!({ "content": [] });
        assert_eq!(parse_tool_result(raw).unwrap_err().kind(), "ProtocolError");
    }

    #[test]
    fn test_non_object_result_is_protocol_error() {
        assert_eq!(
            parse_tool_result(serde_json::json!("nope")).unwrap_err().kind(),
            "ProtocolError"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unknown_tool_fails_without_round_trip() {
        use crate::channel::ChannelConfig;

        // Never answers tools/call, so a round trip would time out instead
        let script = r#"
read -r l
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'
read -r l
read -r l
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"get_current_stock_price"}]}}'
while read -r l; do :; done
"#;
        let config = ChannelConfig::new("fake", "sh").with_args(["-c", script]);
        let mut channel = StdioChannel::open(&config).await.unwrap();

        let err = {
            let mut client = ToolClient::new(&mut channel);
            assert_eq!(client.list_tools().len(), 1);
            client
                .invoke("rm_rf", serde_json::json!({}), Duration::from_secs(5))
                .await
                .unwrap_err()
        };
        match &err {
            McpError::UnknownTool { name, advertised } => {
                assert_eq!(name, "rm_rf");
                assert_eq!(advertised, "get_current_stock_price");
            }
            other => panic!("expected UnknownTool, got {other:?}"),
        }
        assert!(channel.is_usable());
        channel.close().await;
    }
}
