//! MCP over STDIO for skillbridge
//!
//! Client side: [`StdioChannel`] spawns a tool server child and performs the
//! handshake, [`ToolClient`] invokes advertised tools on it. Server side:
//! [`McpServer`] exposes a [`skillbridge_core::ToolRegistry`] on stdin/stdout.

pub mod channel;
pub mod error;
pub mod invoker;
pub mod protocol;
pub mod server;
pub mod transport;

pub use channel::{ChannelConfig, StdioChannel};
pub use error::McpError;
pub use invoker::{ToolClient, parse_tool_result};
pub use protocol::ToolDescriptor;
pub use server::McpServer;
