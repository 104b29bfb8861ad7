//! Configuration module
//!
//! Handles loading and saving Wirecall configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};
use crate::serialization::{IdentityCompressor, JsonSerializer};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client settings
    #[serde(default)]
    pub client: ClientConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest request frame accepted
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl ServerConfig {
    /// `bind_address:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address (host:port)
    #[serde(default = "default_server_address")]
    pub address: String,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Serializer code used for outgoing calls
    #[serde(default = "default_serializer")]
    pub serializer: u8,
    /// Compressor code used for outgoing calls
    #[serde(default = "default_compressor")]
    pub compressor: u8,
    /// Largest response frame accepted
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Connection pool settings
    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_server_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_PORT)
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_serializer() -> u8 {
    JsonSerializer::CODE
}

fn default_compressor() -> u8 {
    IdentityCompressor::CODE
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            connect_timeout_ms: default_connect_timeout(),
            serializer: default_serializer(),
            compressor: default_compressor(),
            max_frame_size: default_max_frame_size(),
            pool: PoolConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections dialed when the pool is created
    #[serde(default = "default_initial_connections")]
    pub initial_connections: usize,
    /// Idle connections kept for reuse
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    /// Open connections allowed at once (idle and in use)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle connections older than this are closed instead of reused
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// How long to wait for a connection when the pool is exhausted
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

fn default_initial_connections() -> usize {
    5
}

fn default_max_idle() -> usize {
    20
}

fn default_max_connections() -> usize {
    30
}

fn default_idle_timeout() -> u64 {
    60_000
}

fn default_acquire_timeout() -> u64 {
    5000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_connections: default_initial_connections(),
            max_idle: default_max_idle(),
            max_connections: default_max_connections(),
            idle_timeout_ms: default_idle_timeout(),
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("wirecall/config.toml")),
            Some(PathBuf::from("./wirecall.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        logging: LoggingConfig {
            level: "wirecall=debug,info".to_string(),
        },
        client: ClientConfig {
            compressor: crate::serialization::GzipCompressor::CODE,
            ..ClientConfig::new("10.0.0.12:8085")
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
