//! Configuration loading
//!
//! One [`SkillbridgeConfig`] is built at process start (defaults, then the TOML
//! file, then environment overrides, then CLI flags) and passed by reference
//! into the components that need it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable overriding `specialist.host`
pub const ENV_HOST: &str = "SKILLBRIDGE_HOST";
/// Environment variable overriding `specialist.port`
pub const ENV_PORT: &str = "SKILLBRIDGE_PORT";
/// Environment variable overriding `tool_server.command`
pub const ENV_TOOL_SERVER: &str = "SKILLBRIDGE_TOOL_SERVER";
/// Mock-data switch. Read by the config layer and forwarded to the tool server child.
pub const ENV_MOCK_DATA: &str = "SKILLBRIDGE_MOCK_DATA";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillbridgeConfig {
    pub specialist: SpecialistConfig,
    pub agent: AgentConfig,
    pub tool_server: ToolServerConfig,
    pub timeouts: TimeoutConfig,
    pub host: HostConfig,
}

/// Where the specialist's A2A server listens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialistConfig {
    pub host: String,
    pub port: u16,
    /// URL advertised in the agent card. Defaults to `http://{host}:{port}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

impl Default for SpecialistConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            public_url: None,
        }
    }
}

impl SpecialistConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn public_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// Identity published in the agent card
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub description: String,
    pub version: String,
    pub organization: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "StockInfoAgent".to_string(),
            description: "Provides current stock and bitcoin prices through an MCP tool server."
                .to_string(),
            version: "1.0.0".to_string(),
            organization: "skillbridge".to_string(),
        }
    }
}

/// How to launch the tool server child process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mock_data: bool,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            command: "skillbridge-market-mcp".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            mock_data: false,
        }
    }
}

impl ToolServerConfig {
    /// Environment handed to the child, including the mock-data switch.
    ///
    /// `mock_data` always decides the switch; an `env` entry for the same key
    /// is dropped.
    pub fn child_env(&self) -> Vec<(String, String)> {
        let mock = if self.mock_data { "1" } else { "0" };
        if let Some(value) = self.env.get(ENV_MOCK_DATA) {
            warn!(
                "tool_server.env sets {}={}; using mock_data = {} instead",
                ENV_MOCK_DATA, value, self.mock_data
            );
        }

        let mut env: Vec<(String, String)> = self
            .env
            .iter()
            .filter(|(k, _)| k.as_str() != ENV_MOCK_DATA)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.push((ENV_MOCK_DATA.to_string(), mock.to_string()));
        env
    }
}

/// Timeouts, all bounded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub handshake_secs: u64,
    pub call_secs: u64,
    pub task_secs: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_secs: 5,
            call_secs: 20,
            task_secs: 30,
            shutdown_grace_ms: 500,
        }
    }
}

impl TimeoutConfig {
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call_secs)
    }

    pub fn task(&self) -> Duration {
        Duration::from_secs(self.task_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Host-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Base URLs of specialists to discover at startup
    pub specialists: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            specialists: vec!["http://127.0.0.1:8001".to_string()],
            request_timeout_secs: 60,
        }
    }
}

impl HostConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SkillbridgeConfig {
    /// `~/.skillbridge/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".skillbridge").join("config.toml"))
    }

    /// Load configuration from `path`, or from the default location if it exists,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST).filter(|v| !v.trim().is_empty()) {
            self.specialist.host = host.trim().to_string();
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.specialist.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_PORT} is not a port: {port}")))?;
        }
        if let Some(command) = lookup(ENV_TOOL_SERVER).filter(|v| !v.trim().is_empty()) {
            self.tool_server.command = command.trim().to_string();
        }
        if let Some(flag) = lookup(ENV_MOCK_DATA) {
            self.tool_server.mock_data = parse_flag(&flag).ok_or_else(|| {
                ConfigError::Invalid(format!("{ENV_MOCK_DATA} is not a boolean: {flag}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tool_server.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "tool_server.command must not be empty".to_string(),
            ));
        }
        let t = &self.timeouts;
        if t.handshake_secs == 0 || t.call_secs == 0 || t.task_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.host.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "host.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a loose boolean flag (`1`, `true`, `yes`, `on` and their negatives)
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SkillbridgeConfig::default();
        assert_eq!(config.specialist.bind_addr(), "127.0.0.1:8001");
        assert_eq!(config.specialist.public_url(), "http://127.0.0.1:8001");
        assert_eq!(config.timeouts.handshake(), Duration::from_secs(5));
        assert!(!config.tool_server.mock_data);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [specialist]
            port = 9100

            [tool_server]
            command = "/opt/tools/market"
            mock_data = true
        "#;
        let config = SkillbridgeConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.specialist.port, 9100);
        assert_eq!(config.specialist.host, "127.0.0.1");
        assert_eq!(config.tool_server.command, "/opt/tools/market");
        assert!(config.tool_server.mock_data);
        assert_eq!(config.timeouts.task_secs, 30);
    }

    #[test]
    fn test_public_url_override_trims_slash() {
        let mut config = SkillbridgeConfig::default();
        config.specialist.public_url = Some("https://stock.example/".to_string());
        assert_eq!(config.specialist.public_url(), "https://stock.example");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SkillbridgeConfig::default();
        config
            .apply_overrides(lookup_from(&[
                (ENV_HOST, "0.0.0.0"),
                (ENV_PORT, "8123"),
                (ENV_TOOL_SERVER, "/usr/local/bin/market"),
                (ENV_MOCK_DATA, "yes"),
            ]))
            .unwrap();
        assert_eq!(config.specialist.bind_addr(), "0.0.0.0:8123");
        assert_eq!(config.tool_server.command, "/usr/local/bin/market");
        assert!(config.tool_server.mock_data);
    }

    #[test]
    fn test_env_override_bad_port() {
        let mut config = SkillbridgeConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[(ENV_PORT, "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_env_override_bad_flag() {
        let mut config = SkillbridgeConfig::default();
        assert!(
            config
                .apply_overrides(lookup_from(&[(ENV_MOCK_DATA, "maybe")]))
                .is_err()
        );
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = SkillbridgeConfig::default();
        config.timeouts.call_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let mut config = SkillbridgeConfig::default();
        config.tool_server.command = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_child_env_carries_mock_flag() {
        let mut tool_server = ToolServerConfig::default();
        tool_server
            .env
            .insert("RUST_LOG".to_string(), "debug".to_string());
        tool_server.mock_data = true;
        let env = tool_server.child_env();
        assert!(env.contains(&("RUST_LOG".to_string(), "debug".to_string())));
        assert!(env.contains(&(ENV_MOCK_DATA.to_string(), "1".to_string())));
    }

    #[test]
    fn test_mock_flag_wins_over_env_entry() {
        let mut tool_server = ToolServerConfig::default();
        tool_server
            .env
            .insert(ENV_MOCK_DATA.to_string(), "1".to_string());
        tool_server.mock_data = false;
        let mock: Vec<_> = tool_server
            .child_env()
            .into_iter()
            .filter(|(k, _)| k == ENV_MOCK_DATA)
            .collect();
        assert_eq!(mock, vec![(ENV_MOCK_DATA.to_string(), "0".to_string())]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timeouts]\nhandshake_secs = 2\ncall_secs = 3").unwrap();
        let config = SkillbridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.timeouts.handshake_secs, 2);
        assert_eq!(config.timeouts.call_secs, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let err = SkillbridgeConfig::from_file(Path::new("/nonexistent/skillbridge.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_toml_roundtrip_is_parseable() {
        let config = SkillbridgeConfig::default();
        let raw = config.to_toml_string().unwrap();
        assert!(raw.contains("[tool_server]"));
        let parsed = SkillbridgeConfig::from_toml_str(&raw).unwrap();
        assert_eq!(parsed.specialist.port, config.specialist.port);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag(""), Some(false));
        assert_eq!(parse_flag("2"), None);
    }
}
