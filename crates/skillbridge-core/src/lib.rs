//! Shared building blocks for skillbridge
//!
//! Holds the process-wide configuration structure and the tool handler
//! abstraction used by both tool servers and host-side delegation tools.

pub mod config;
pub mod tools;

pub use config::{
    AgentConfig, ConfigError, HostConfig, SkillbridgeConfig, SpecialistConfig, TimeoutConfig,
    ToolServerConfig,
};
pub use tools::{ToolDefinition, ToolHandler, ToolRegistry, json_schema};
