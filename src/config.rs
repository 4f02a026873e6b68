//! Configuration management for the MCP engine
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{McpError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
///
/// Holds identity for both engine roles, the transport selection, and
/// logging output options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server engine identity
    #[serde(default)]
    pub server: ServerConfig,
    /// Client engine identity and request tuning
    #[serde(default)]
    pub client: ClientConfig,
    /// Transport selection
    #[serde(default)]
    pub transport: TransportConfig,
    /// Log output options
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server identity reported during the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Optional instructions returned in the initialize response
    #[serde(default)]
    pub instructions: Option<String>,
}

fn default_server_name() -> String {
    "mcp-engine-server".to_string()
}

fn default_client_name() -> String {
    "mcp-engine-client".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_version(),
            instructions: None,
        }
    }
}

/// Client identity and request tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,

    /// Per-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Upper bound on in-flight requests; unbounded when absent
    #[serde(default)]
    pub max_pending_requests: Option<usize>,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_version(),
            request_timeout_ms: default_request_timeout_ms(),
            max_pending_requests: None,
        }
    }
}

impl ClientConfig {
    /// Request deadline as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Which transport the binary uses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// `stdio` or `websocket`
    #[serde(default = "default_transport_kind")]
    pub kind: String,

    /// URL the client dials for the websocket transport
    #[serde(default = "default_url")]
    pub url: String,

    /// Address the websocket server listens on
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_transport_kind() -> String {
    "stdio".to_string()
}

fn default_url() -> String {
    "ws://127.0.0.1:8080/".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            url: default_url(),
            bind: default_bind(),
        }
    }
}

/// Log output options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

const VALID_TRANSPORTS: [&str; 2] = ["stdio", "websocket"];

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file falls back to defaults with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| McpError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| McpError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(name) = std::env::var("MCP_ENGINE_SERVER_NAME") {
            self.server.name = name;
        }

        if let Ok(name) = std::env::var("MCP_ENGINE_CLIENT_NAME") {
            self.client.name = name;
        }

        if let Ok(timeout) = std::env::var("MCP_ENGINE_REQUEST_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(v) => {
                    self.client.request_timeout_ms = v;
                    tracing::debug!(
                        request_timeout_ms = v,
                        "Env override: MCP_ENGINE_REQUEST_TIMEOUT_MS"
                    );
                }
                Err(_) => {
                    tracing::warn!("Invalid value for MCP_ENGINE_REQUEST_TIMEOUT_MS: {}", timeout);
                }
            }
        }

        if let Ok(max) = std::env::var("MCP_ENGINE_MAX_PENDING") {
            match max.parse::<usize>() {
                Ok(v) => self.client.max_pending_requests = Some(v),
                Err(_) => tracing::warn!("Invalid value for MCP_ENGINE_MAX_PENDING: {}", max),
            }
        }

        if let Ok(kind) = std::env::var("MCP_ENGINE_TRANSPORT") {
            let kind = kind.to_lowercase();
            if VALID_TRANSPORTS.contains(&kind.as_str()) {
                self.transport.kind = kind;
            } else {
                tracing::warn!("Invalid transport: {}, using {}", kind, self.transport.kind);
            }
        }

        if let Ok(url) = std::env::var("MCP_ENGINE_URL") {
            self.transport.url = url;
        }

        if let Ok(bind) = std::env::var("MCP_ENGINE_BIND") {
            self.transport.bind = bind;
        }

        if let Ok(json_logs) = std::env::var("MCP_ENGINE_JSON_LOGS") {
            match json_logs.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.logging.json = true,
                "0" | "false" | "no" => self.logging.json = false,
                _ => tracing::warn!("Invalid value for MCP_ENGINE_JSON_LOGS: {}", json_logs),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        match &cli.command {
            crate::cli::Commands::Serve { transport, bind } => {
                if let Some(kind) = transport {
                    self.transport.kind = kind.to_lowercase();
                }
                if let Some(bind) = bind {
                    self.transport.bind = bind.clone();
                }
            }
            crate::cli::Commands::Call { url, .. } | crate::cli::Commands::List { url } => {
                if let Some(url) = url {
                    self.transport.url = url.clone();
                }
            }
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.server.name.trim().is_empty() {
            return Err(McpError::Config("server.name cannot be empty".to_string()).into());
        }

        if self.client.name.trim().is_empty() {
            return Err(McpError::Config("client.name cannot be empty".to_string()).into());
        }

        if self.client.request_timeout_ms == 0 {
            return Err(McpError::Config(
                "client.request_timeout_ms must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.max_pending_requests == Some(0) {
            return Err(McpError::Config(
                "client.max_pending_requests must be greater than 0".to_string(),
            )
            .into());
        }

        if !VALID_TRANSPORTS.contains(&self.transport.kind.as_str()) {
            return Err(McpError::Config(format!(
                "Invalid transport kind: {}. Must be one of: {}",
                self.transport.kind,
                VALID_TRANSPORTS.join(", ")
            ))
            .into());
        }

        if self.transport.kind == "websocket" && self.transport.bind.trim().is_empty() {
            return Err(McpError::Config("transport.bind cannot be empty".to_string()).into());
        }

        if !(self.transport.url.starts_with("ws://") || self.transport.url.starts_with("wss://")) {
            return Err(McpError::Config(format!(
                "transport.url must be a ws:// or wss:// URL, got {}",
                self.transport.url
            ))
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use serial_test::serial;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.name, "mcp-engine-server");
        assert_eq!(config.client.request_timeout_ms, 30_000);
        assert_eq!(config.client.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.transport.kind, "stdio");
        assert!(config.client.max_pending_requests.is_none());
        assert!(!config.logging.json);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.client.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_max_pending() {
        let mut config = Config::default();
        config.client.max_pending_requests = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_unknown_transport() {
        let mut config = Config::default();
        config.transport.kind = "carrier-pigeon".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid transport kind"));
    }

    #[test]
    fn test_config_validation_bad_url() {
        let mut config = Config::default();
        config.transport.url = "http://localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_server_name() {
        let mut config = Config::default();
        config.server.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  name: yaml-server\nclient:\n  request_timeout_ms: 500\n  max_pending_requests: 4\ntransport:\n  kind: websocket\n  bind: 0.0.0.0:9000\n"
        )
        .unwrap();

        let path = file.path().to_str().unwrap();
        let config = Config::load(path, &cli(&["mcp-engine", "list"])).unwrap();
        assert_eq!(config.server.name, "yaml-server");
        assert_eq!(config.server.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.client.request_timeout_ms, 500);
        assert_eq!(config.client.max_pending_requests, Some(4));
        assert_eq!(config.transport.kind, "websocket");
        assert_eq!(config.transport.bind, "0.0.0.0:9000");
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/mcp.yaml", &cli(&["mcp-engine", "list"])).unwrap();
        assert_eq!(config.client.name, "mcp-engine-client");
    }

    #[test]
    #[serial]
    fn test_load_invalid_yaml_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server: [unterminated").unwrap();
        let result = Config::load(file.path().to_str().unwrap(), &cli(&["mcp-engine", "list"]));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("MCP_ENGINE_REQUEST_TIMEOUT_MS", "1234");
        std::env::set_var("MCP_ENGINE_TRANSPORT", "WebSocket");
        std::env::set_var("MCP_ENGINE_MAX_PENDING", "not-a-number");

        let config = Config::load("/nonexistent/mcp.yaml", &cli(&["mcp-engine", "list"])).unwrap();

        std::env::remove_var("MCP_ENGINE_REQUEST_TIMEOUT_MS");
        std::env::remove_var("MCP_ENGINE_TRANSPORT");
        std::env::remove_var("MCP_ENGINE_MAX_PENDING");

        assert_eq!(config.client.request_timeout_ms, 1234);
        assert_eq!(config.transport.kind, "websocket");
        assert!(config.client.max_pending_requests.is_none());
    }

    #[test]
    #[serial]
    fn test_cli_overrides_take_precedence() {
        std::env::set_var("MCP_ENGINE_BIND", "127.0.0.1:1111");
        let config = Config::load(
            "/nonexistent/mcp.yaml",
            &cli(&["mcp-engine", "serve", "--transport", "websocket", "--bind", "127.0.0.1:2222"]),
        )
        .unwrap();
        std::env::remove_var("MCP_ENGINE_BIND");

        assert_eq!(config.transport.kind, "websocket");
        assert_eq!(config.transport.bind, "127.0.0.1:2222");
    }
}
