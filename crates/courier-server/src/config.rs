//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (COURIER_*, nested with `__`)
//!
//! ```bash
//! COURIER_PORT=9000 COURIER_BROKER__MAILBOX_CAPACITY=256 courier
//! ```

use anyhow::{Context, Result};
use courier_core::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Broker queue sizes.
    #[serde(default)]
    pub broker: BrokerSettings,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Broker queue sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Capacity of the shared input queue.
    #[serde(default = "default_queue_capacity")]
    pub input_capacity: usize,

    /// Capacity of each subscriber mailbox.
    #[serde(default = "default_queue_capacity")]
    pub mailbox_capacity: usize,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message content size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// How often broker counters are mirrored into gauges.
    #[serde(default = "default_metrics_interval")]
    pub interval_ms: u64,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_queue_capacity() -> usize {
    100
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    16 * 1024 // 16 KB
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_interval() -> u64 {
    1_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            websocket_path: default_ws_path(),
            broker: BrokerSettings::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            input_capacity: default_queue_capacity(),
            mailbox_capacity: default_queue_capacity(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            interval_ms: default_metrics_interval(),
        }
    }
}

impl From<&BrokerSettings> for BrokerConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            input_capacity: settings.input_capacity,
            mailbox_capacity: settings.mailbox_capacity,
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, overlaid with
    /// `COURIER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "courier.toml",
            "/etc/courier/courier.toml",
            "~/.config/courier/courier.toml",
        ];

        let mut builder = ::config::Config::builder();
        if let Some(path) = config_paths
            .iter()
            .map(|p| shellexpand::tilde(p).into_owned())
            .find(|p| Path::new(p).exists())
        {
            tracing::info!("Loading config from {}", path);
            builder = builder.add_source(::config::File::from(Path::new(&path)));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Broker configuration derived from the `[broker]` section.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig::from(&self.broker)
    }
}
