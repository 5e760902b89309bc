//! Configuration management for the Switchboard server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use crate::cli::CliArgs;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use switchboard_server::{BindProtocol, ServerConfig, ServerError};
use tracing::info;

pub const DEFAULT_PID_FILE: &str = "/tmp/ws-server.pid";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Listener configuration settings
    #[serde(default)]
    pub listeners: ListenerSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Background execution settings
    #[serde(default)]
    pub daemon: DaemonSettings,
}

/// Network binding and connection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// One of `tcp`, `ws` or `wss`
    pub protocol: String,
    /// Host name or IP address to bind to
    pub bind_address: String,
    /// TCP port to bind to
    pub port: u16,
    /// Maximum number of concurrent client connections
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            protocol: "ws".to_string(),
            bind_address: "127.0.0.1".to_string(),
            port: 8889,
            max_connections: 1000,
        }
    }
}

/// Which listeners and identification adapter to install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Listener names, in dispatch order
    pub enabled: Vec<String>,
    /// Optional identification adapter name
    pub identification: Option<String>,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            enabled: vec!["echo".to_string(), "chat".to_string()],
            identification: None,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Log file used when running in the background
    pub file_path: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// PID file guarding the background instance
    pub pid_file: String,
    /// Seconds `stop` waits for the signalled instance to exit
    pub stop_timeout_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            pid_file: DEFAULT_PID_FILE.to_string(),
            stop_timeout_secs: 5,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Cannot read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Cannot parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Cannot create {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the loaded file.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.debug {
            self.logging.level = "debug".to_string();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(pid_file) = &args.pid_file {
            self.daemon.pid_file = pid_file.to_string_lossy().into_owned();
        }
    }

    /// Converts the application configuration to the engine's server
    /// configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, ServerError> {
        Ok(ServerConfig {
            protocol: self.server.protocol.parse::<BindProtocol>()?,
            bind_address: self.server.bind_address.clone(),
            port: self.server.port,
            max_connections: self.server.max_connections,
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if let Err(e) = self.server.protocol.parse::<BindProtocol>() {
            return Err(e.to_string());
        }

        if self.server.bind_address.trim().is_empty() {
            return Err("Bind address cannot be empty".to_string());
        }

        if self.server.port == 0 {
            return Err("Port must be between 1 and 65535".to_string());
        }

        if self.server.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        if self.daemon.pid_file.trim().is_empty() {
            return Err("PID file path cannot be empty".to_string());
        }

        Ok(())
    }
}
