//! # Configuration Management Module
//!
//! Meshgate reads a small TOML file with three sections:
//!
//! - [`ServerConfig`] - HTTP listener
//! - [`MeshtasticConfig`] - serial device settings
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [meshtastic]
//! port = "/dev/ttyUSB0"   # "" or "none" runs without a device
//! baud_rate = 115200
//! connect_timeout_secs = 30
//! hop_limit = 3
//! heartbeat_interval_secs = 300
//!
//! [logging]
//! level = "info"
//! file = "meshgate.log"
//! ```
//!
//! ## Precedence
//!
//! CLI args > Environment (`SERIAL_PORT`, `MESHGATE_BIND`) > Config file > Defaults

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Environment variable naming the serial port.
pub const ENV_SERIAL_PORT: &str = "SERIAL_PORT";
/// Environment variable overriding the HTTP listen address.
pub const ENV_BIND: &str = "MESHGATE_BIND";
/// Port value that explicitly disables the device link.
pub const PORT_DISABLED: &str = "none";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshtasticConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM7`. Empty or `none` disables it.
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Seconds to wait for the radio's configuration dump before giving up.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u32,
    /// Keepalive period; 0 turns heartbeats off.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_hop_limit() -> u32 {
    3
}

fn default_heartbeat_interval_secs() -> u64 {
    300
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            connect_timeout_secs: default_connect_timeout_secs(),
            hop_limit: default_hop_limit(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

/// Empty (after trimming) or `none` in any case means "do not connect".
pub fn port_disabled(port: &str) -> bool {
    let port = port.trim();
    port.is_empty() || port.eq_ignore_ascii_case(PORT_DISABLED)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Apply `SERIAL_PORT` / `MESHGATE_BIND` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply environment-style overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_SERIAL_PORT) {
            self.meshtastic.port = port.trim().to_string();
        }
        if let Some(bind) = lookup(ENV_BIND) {
            let bind = bind.trim();
            if !bind.is_empty() {
                self.server.bind = bind.to_string();
            }
        }
    }
}
