//! Line-delimited JSON-RPC framing over an arbitrary reader/writer pair
//!
//! Strictly half-duplex: one request is written, then frames are read until the
//! response carrying the same id arrives. Frames with any other id are dropped.

use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::error::McpError;
use crate::protocol::{JSONRPC_VERSION, JsonRpcError};

/// Longest prefix of a frame echoed into logs and errors
const SNIPPET_LEN: usize = 200;

pub struct RpcTransport<R, W> {
    reader: BufReader<R>,
    writer: Option<W>,
    next_id: u64,
    /// Set once the stream is in an unknown state; every later call fails fast
    unusable: Option<String>,
}

impl<R, W> RpcTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Some(writer),
            next_id: 1,
            unusable: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.unusable.is_none()
    }

    /// Send a request and wait for its response, bounded by `timeout`.
    ///
    /// Returns the `result` member, or [`McpError::Rpc`] for an `error` member.
    pub async fn request(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        self.ensure_usable()?;

        let id = self.next_id;
        self.next_id += 1;

        let frame = serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
            "params": params,
        });

        let outcome = tokio::time::timeout(timeout, self.exchange(id, &frame)).await;
        let response = match outcome {
            Err(_) => {
                let err = McpError::Timeout {
                    method: method.to_string(),
                    timeout,
                };
                self.mark_unusable(&err);
                return Err(err);
            }
            Ok(Err(err)) => {
                if err.poisons_channel() {
                    self.mark_unusable(&err);
                }
                return Err(err);
            }
            Ok(Ok(response)) => response,
        };

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let error: JsonRpcError = serde_json::from_value(error.clone()).map_err(|e| {
                let err = McpError::Protocol(format!("malformed error object: {e}"));
                self.mark_unusable(&err);
                err
            })?;
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send a notification (no id, no response)
    pub async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError> {
        self.ensure_usable()?;
        let frame = serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
            "params": params,
        });
        if let Err(err) = self.write_frame(&frame).await {
            self.mark_unusable(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Drop the writer so the peer sees end-of-input. Idempotent.
    pub fn close_writer(&mut self) {
        if self.writer.take().is_some() {
            debug!("Closed tool server input stream");
        }
        if self.unusable.is_none() {
            self.unusable = Some("channel closed".to_string());
        }
    }

    fn ensure_usable(&self) -> Result<(), McpError> {
        match &self.unusable {
            Some(reason) => Err(McpError::ChannelUnusable(reason.clone())),
            None => Ok(()),
        }
    }

    fn mark_unusable(&mut self, err: &McpError) {
        warn!("Marking tool channel unusable: {}", err);
        self.unusable = Some(err.to_string());
    }

    async fn exchange(&mut self, id: u64, frame: &Value) -> Result<Value, McpError> {
        self.write_frame(frame).await?;
        self.read_response(id).await
    }

    async fn write_frame(&mut self, frame: &Value) -> Result<(), McpError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| McpError::ChannelUnusable("input stream closed".to_string()))?;
        let line = serde_json::to_string(frame)
            .map_err(|e| McpError::Protocol(format!("failed to encode request: {e}")))?
            + "\n";
        debug!("MCP sending: {}", snippet(&line));
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read frames until the response for `expected_id` arrives
    async fn read_response(&mut self, expected_id: u64) -> Result<Value, McpError> {
        loop {
            let mut line = String::new();
            let bytes = self.reader.read_line(&mut line).await?;
            if bytes == 0 {
                return Err(McpError::Protocol(
                    "tool server closed its output before responding".to_string(),
                ));
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let msg: Value = serde_json::from_str(line).map_err(|e| {
                McpError::Protocol(format!(
                    "invalid JSON from tool server ({e}): {}",
                    snippet(line)
                ))
            })?;

            let Some(object) = msg.as_object() else {
                return Err(McpError::Protocol(format!(
                    "expected a JSON object, got: {}",
                    snippet(line)
                )));
            };

            if object.contains_key("method") {
                debug!("MCP skipping server-initiated message: {}", snippet(line));
                continue;
            }

            match object.get("id").and_then(Value::as_u64) {
                Some(id) if id == expected_id => return Ok(msg),
                _ => warn!(
                    "Discarding response with unexpected id (waiting for {}): {}",
                    expected_id,
                    snippet(line)
                ),
            }
        }
    }
}

/// Char-safe prefix of a frame for logs
pub(crate) fn snippet(line: &str) -> &str {
    let line = line.trim_end();
    match line.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
