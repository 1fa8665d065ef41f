//! Stdio RPC channel bound to a tool server child process
//!
//! The creator owns the whole lifecycle: [`StdioChannel::open`] spawns and
//! handshakes (or [`StdioChannel::spawn`] then [`StdioChannel::initialize`]), [`StdioChannel::call`] exchanges one request, and
//! [`StdioChannel::close`] tears the child down. `close` is idempotent and must
//! run on every exit path; `Drop` only issues a best-effort kill.

use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use skillbridge_core::{TimeoutConfig, ToolServerConfig};

use crate::error::McpError;
use crate::protocol::{PROTOCOL_VERSION, ToolDescriptor};
use crate::transport::RpcTransport;

/// How to launch and talk to one tool server
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Label used in logs
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub handshake_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            handshake_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(500),
        }
    }

    pub fn from_config(
        name: impl Into<String>,
        tool_server: &ToolServerConfig,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            name: name.into(),
            command: tool_server.command.clone(),
            args: tool_server.args.clone(),
            env: tool_server.child_env(),
            handshake_timeout: timeouts.handshake(),
            shutdown_grace: timeouts.shutdown_grace(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A live connection to a tool server child process
pub struct StdioChannel {
    name: String,
    child: Option<Child>,
    pid: Option<u32>,
    transport: RpcTransport<ChildStdout, ChildStdin>,
    tools: Vec<ToolDescriptor>,
    server_info: Option<Value>,
    shutdown_grace: Duration,
}

impl StdioChannel {
    /// Spawn the tool server and complete the handshake within the configured window.
    ///
    /// On handshake failure the child is torn down before the error is returned.
    pub async fn open(config: &ChannelConfig) -> Result<Self, McpError> {
        let mut channel = Self::spawn(config).await?;
        if let Err(err) = channel.initialize(config.handshake_timeout).await {
            channel.close().await;
            return Err(err);
        }
        Ok(channel)
    }

    /// Spawn the tool server without handshaking.
    ///
    /// The caller must run [`StdioChannel::initialize`] before calling tools and
    /// [`StdioChannel::close`] on every path.
    pub async fn spawn(config: &ChannelConfig) -> Result<Self, McpError> {
        info!(
            "Spawning tool server: {} ({} {})",
            config.name,
            config.command,
            config.args.join(" ")
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
            command: config.command.clone(),
            source,
        })?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return Err(McpError::Protocol(
                "failed to capture tool server stdio".to_string(),
            ));
        };

        // Forward child stderr into our log; its stdout is the RPC stream
        if let Some(stderr) = child.stderr.take() {
            let server_name = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        debug!("Tool server '{}' stderr: {}", server_name, line);
                    }
                }
            });
        }

        Ok(Self {
            name: config.name.clone(),
            child: Some(child),
            pid,
            transport: RpcTransport::new(stdout, stdin),
            tools: Vec::new(),
            server_info: None,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Run the handshake, bounded by `timeout`. Does not close on failure.
    pub async fn initialize(&mut self, timeout: Duration) -> Result<(), McpError> {
        let deadline = Instant::now() + timeout;
        match self.handshake(deadline).await {
            Ok(()) => {
                info!(
                    "Tool server '{}' ready (pid {:?}, {} tools)",
                    self.name,
                    self.pid,
                    self.tools.len()
                );
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    McpError::Timeout { .. } => McpError::HandshakeTimeout(timeout),
                    other => other,
                };
                warn!("Tool server '{}' handshake failed: {}", self.name, err);
                Err(err)
            }
        }
    }

    /// `initialize`, `notifications/initialized`, then `tools/list`
    async fn handshake(&mut self, deadline: Instant) -> Result<(), McpError> {
        let init = self
            .transport
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "skillbridge",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
                remaining(deadline),
            )
            .await?;

        if !init.is_object() {
            return Err(McpError::Protocol(format!(
                "initialize returned a non-object result: {init}"
            )));
        }
        debug!("MCP initialize response: {}", init);
        self.server_info = init.get("serverInfo").cloned();

        let notified = tokio::time::timeout(
            remaining(deadline),
            self.transport
                .notify("notifications/initialized", serde_json::json!({})),
        )
        .await;
        match notified {
            Ok(result) => result?,
            Err(_) => {
                return Err(McpError::Timeout {
                    method: "notifications/initialized".to_string(),
                    timeout: remaining(deadline),
                });
            }
        }

        let listed = self
            .transport
            .request("tools/list", serde_json::json!({}), remaining(deadline))
            .await?;
        let tools = listed
            .get("tools")
            .cloned()
            .ok_or_else(|| McpError::Protocol("tools/list result has no 'tools'".to_string()))?;
        self.tools = serde_json::from_value(tools)
            .map_err(|e| McpError::Protocol(format!("invalid tool descriptors: {e}")))?;
        Ok(())
    }

    /// Exchange one request/response. `&mut self` serializes calls.
    ///
    /// After a timeout or protocol error the channel is unusable and must be closed.
    pub async fn call(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        debug!("Tool server '{}' call: {}", self.name, method);
        self.transport.request(method, params, timeout).await
    }

    /// Close stdin, wait out the grace period, then kill and reap. Idempotent.
    pub async fn close(&mut self) {
        self.transport.close_writer();

        let Some(mut child) = self.child.take() else {
            return;
        };

        match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Tool server '{}' exited: {}", self.name, status);
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for tool server '{}': {}", self.name, e);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill tool server '{}': {}", self.name, e);
                }
            }
            Err(_) => {
                warn!(
                    "Tool server '{}' still running after {:?}, killing",
                    self.name, self.shutdown_grace
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill tool server '{}': {}", self.name, e);
                }
            }
        }
    }

    /// Tools advertised during the handshake
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process id of the child, captured at spawn
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_closed(&self) -> bool {
        self.child.is_none()
    }

    pub fn is_usable(&self) -> bool {
        !self.is_closed() && self.transport.is_usable()
    }
}

impl Drop for StdioChannel {
    fn drop(&mut self) {
        // Can't await in drop; close() is the real teardown path
        if let Some(ref mut child) = self.child {
            warn!("Tool server '{}' dropped without close()", self.name);
            let _ = child.start_kill();
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    /// Answers initialize (id 1), swallows the initialized notification, then
    /// answers tools/list (id 2)
    const HANDSHAKE: &str = r#"
read -r l
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.0.0"}}}'
read -r l
read -r l
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"get_current_stock_price","description":"Price lookup","inputSchema":{"type":"object"}}]}}'
"#;

    fn fake_server(script: &str) -> ChannelConfig {
        let mut config = ChannelConfig::new("fake", "sh").with_args(["-c", script]);
        config.handshake_timeout = Duration::from_secs(5);
        config.shutdown_grace = Duration::from_millis(300);
        config
    }

    #[cfg(target_os = "linux")]
    fn process_alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    #[cfg(not(target_os = "linux"))]
    fn process_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_config_from_core_config() {
        let mut tool_server = ToolServerConfig::default();
        tool_server.command = "/opt/market".to_string();
        tool_server.mock_data = true;
        let config = ChannelConfig::from_config("market", &tool_server, &TimeoutConfig::default());
        assert_eq!(config.command, "/opt/market");
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert!(
            config
                .env
                .contains(&("SKILLBRIDGE_MOCK_DATA".to_string(), "1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let config = ChannelConfig::new("bad", "/nonexistent/binary/path");
        let err = StdioChannel::open(&config).await.err().unwrap();
        assert_eq!(err.kind(), "SpawnError");
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_handshake_and_call() {
        let script = format!(
            "{HANDSHAKE}\nread -r l\nprintf '%s\\n' '{}'\nwhile read -r l; do :; done\n",
            r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"ok"}]}}"#
        );
        let mut channel = StdioChannel::open(&fake_server(&script)).await.unwrap();
        assert_eq!(channel.tools().len(), 1);
        assert_eq!(channel.tools()[0].name, "get_current_stock_price");
        assert_eq!(channel.server_info().unwrap()["name"], "fake");

        let result = channel
            .call(
                "tools/call",
                serde_json::json!({"name": "get_current_stock_price", "arguments": {}}),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "ok");

        let pid = channel.pid().unwrap();
        channel.close().await;
        assert!(channel.is_closed());
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let script = format!("{HANDSHAKE}\nwhile read -r l; do :; done\n");
        let mut channel = StdioChannel::open(&fake_server(&script)).await.unwrap();
        let pid = channel.pid().unwrap();
        channel.close().await;
        channel.close().await;
        assert!(!process_alive(pid));
        assert!(!channel.is_usable());

        let err = channel
            .call("ping", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ChannelUnusable(_)));
    }

    #[tokio::test]
    async fn test_call_timeout_then_forced_kill() {
        // The child ignores stdin EOF, so close() has to kill it
        let script = format!("{HANDSHAKE}\nexec sleep 30\n");
        let mut channel = StdioChannel::open(&fake_server(&script)).await.unwrap();
        let pid = channel.pid().unwrap();

        let err = channel
            .call("tools/call", serde_json::json!({}), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Timeout");
        assert!(!channel.is_usable());

        channel.close().await;
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn test_handshake_timeout_reaps_child() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > {}\nexec sleep 30\n", pid_file.display());
        let mut config = fake_server(&script);
        config.handshake_timeout = Duration::from_millis(300);

        let err = StdioChannel::open(&config).await.err().unwrap();
        assert!(matches!(err, McpError::HandshakeTimeout(_)));

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn test_invalid_handshake_is_protocol_error() {
        let script = "read -r l\necho 'not json at all'\nwhile read -r l; do :; done\n";
        let err = StdioChannel::open(&fake_server(script)).await.err().unwrap();
        assert_eq!(err.kind(), "ProtocolError");
    }

    #[tokio::test]
    async fn test_child_exiting_early_is_protocol_error() {
        let err = StdioChannel::open(&fake_server("exit 0")).await.err().unwrap();
        assert_eq!(err.kind(), "ProtocolError");
    }
}
