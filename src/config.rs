//! # Client Configuration
//!
//! Configuration for the robot client, its transport and its dispatcher.
//! Supports environment variables, config files, and command-line overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::call::CallOptions;
use crate::error::{ClientError, ClientResult};

/// Client configuration
///
/// # Examples
///
/// ```rust
/// use robot_dispatch::config::{ClientConfig, TransportKind};
///
/// let config = ClientConfig::default();
/// assert_eq!(config.endpoint.transport, TransportKind::Tcp);
/// assert_eq!(config.endpoint.address, "127.0.0.1:50051");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: EndpointConfig,
    pub runtime: RuntimeConfig,
    pub dispatcher: DispatcherConfig,
}

/// Which transport the client talks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Robot service hosted inside the client process
    InProcess,
    /// JSON lines over TCP to a robot server
    Tcp,
}

impl std::str::FromStr for TransportKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in_process" | "in-process" | "inprocess" => Ok(TransportKind::InProcess),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(ClientError::config_error(format!(
                "Unknown transport '{}' (expected 'tcp' or 'in_process')",
                other
            ))),
        }
    }
}

/// Remote endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub transport: TransportKind,
    /// Server address (e.g., "127.0.0.1:50051")
    pub address: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Deadline applied to every call that does not set its own
    pub default_deadline_ms: Option<u64>,
}

/// Transport runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads for the transport's tokio runtime
    pub worker_threads: usize,
}

/// Dispatcher thread configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub thread_name: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Tcp,
            address: "127.0.0.1:50051".to_string(),
            connect_timeout_ms: 5000,
            default_deadline_ms: None,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { worker_threads: 2 }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: "robot-dispatcher".to_string(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            runtime: RuntimeConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl EndpointConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Options every call starts from.
    pub fn default_call_options(&self) -> CallOptions {
        match self.default_deadline_ms {
            Some(ms) => CallOptions::new().with_deadline(Duration::from_millis(ms)),
            None => CallOptions::new(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables and config file
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file (./robot-dispatch.toml, ~/.robot-dispatch/config.toml)
    /// 3. Default values
    pub fn load() -> ClientResult<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                debug!("Loading config from: {}", path.display());
                Self::load_from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;

        debug!("Loaded client configuration: {:?}", config);
        Ok(config)
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::config_error(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| ClientError::config_error(format!("Failed to parse config file: {}", e)))
    }

    fn find_config_file() -> Option<PathBuf> {
        let mut candidates = vec![
            PathBuf::from("./robot-dispatch.toml"),
            PathBuf::from("./config/robot-dispatch.toml"),
        ];
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".robot-dispatch").join("config.toml"));
        }

        candidates.into_iter().find(|path| path.is_file())
    }

    /// Apply environment variable overrides
    ///
    /// Unlike a missing variable, a malformed one is an error.
    pub fn apply_env_overrides(&mut self) -> ClientResult<()> {
        if let Ok(transport) = std::env::var("ROBOT_TRANSPORT") {
            self.endpoint.transport = transport.parse()?;
        }
        if let Ok(address) = std::env::var("ROBOT_ADDRESS") {
            self.endpoint.address = address;
        }
        if let Ok(deadline) = std::env::var("ROBOT_DEADLINE_MS") {
            self.endpoint.default_deadline_ms = Some(parse_env("ROBOT_DEADLINE_MS", &deadline)?);
        }
        if let Ok(timeout) = std::env::var("ROBOT_CONNECT_TIMEOUT_MS") {
            self.endpoint.connect_timeout_ms = parse_env("ROBOT_CONNECT_TIMEOUT_MS", &timeout)?;
        }
        if let Ok(threads) = std::env::var("ROBOT_WORKER_THREADS") {
            self.runtime.worker_threads = parse_env("ROBOT_WORKER_THREADS", &threads)?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> ClientResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ClientError::config_error(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ClientError::config_error(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            ClientError::config_error(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ClientResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ClientError::config_error(format!("Invalid {}: {}", name, e)))
}
