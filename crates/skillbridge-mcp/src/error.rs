//! Error taxonomy for the tool layer

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn tool server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool server did not complete the handshake within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("'{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// A previous timeout or protocol failure left the channel in an unknown
    /// state, or it was closed.
    #[error("channel is no longer usable: {0}")]
    ChannelUnusable(String),

    #[error("tool server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unknown tool '{name}' (advertised: {advertised})")]
    UnknownTool { name: String, advertised: String },

    #[error("{0}")]
    ToolFault(String),

    #[error("tool server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Stable name of the error class, used as the A2A error code
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "SpawnError",
            Self::HandshakeTimeout(_) => "HandshakeTimeout",
            Self::Protocol(_) | Self::ChannelUnusable(_) | Self::Io(_) => "ProtocolError",
            Self::Timeout { .. } => "Timeout",
            Self::Rpc { .. } => "RpcError",
            Self::UnknownTool { .. } => "UnknownTool",
            Self::ToolFault(_) => "ToolFault",
        }
    }

    /// Whether the channel must be discarded after this error
    pub fn poisons_channel(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Timeout { .. } | Self::Io(_) | Self::ChannelUnusable(_)
        )
    }
}
