//! Configuration system for the LANShare CLI.

use lanshare_core::TransferConfig;
use lanshare_signal::NegotiationConfig;
use lanshare_signal::RelayServerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// LANShare configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferSection,
    /// Negotiation configuration
    #[serde(default)]
    pub negotiation: NegotiationSection,
    /// Signaling configuration
    #[serde(default)]
    pub signaling: SignalingSection,
    /// Receive configuration
    #[serde(default)]
    pub receive: ReceiveSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pause sending above this many buffered bytes
    #[serde(default = "default_high_water")]
    pub high_water: usize,
    /// Resume threshold (defaults to half of `high_water`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_water: Option<usize>,
    /// Give up waiting for the send window after this many milliseconds
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Accepted incoming objects per metadata window
    #[serde(default = "default_max_meta")]
    pub max_meta_per_window: usize,
    /// Metadata window in seconds
    #[serde(default = "default_meta_window_secs")]
    pub meta_window_secs: u64,
}

/// Negotiation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationSection {
    /// Candidate gathering bound in seconds
    #[serde(default = "default_gather_timeout_secs")]
    pub gather_timeout_secs: u64,
    /// Channel open bound in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// STUN/TURN servers
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

/// Signaling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingSection {
    /// Relay address used when `--relay` is not given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
    /// Bind address of `lanshare relay`
    #[serde(default = "default_relay_bind")]
    pub bind: String,
    /// Concurrent clients accepted by `lanshare relay`
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

/// Receive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveSection {
    /// Directory received objects are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_chunk_size() -> usize {
    lanshare_core::DEFAULT_CHUNK_SIZE
}

fn default_high_water() -> usize {
    lanshare_core::DEFAULT_HIGH_WATER
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

fn default_max_meta() -> usize {
    10
}

fn default_meta_window_secs() -> u64 {
    60
}

fn default_gather_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_ice_servers() -> Vec<String> {
    vec![lanshare_signal::negotiator::DEFAULT_ICE_SERVER.to_string()]
}

fn default_relay_bind() -> String {
    format!("0.0.0.0:{}", lanshare_signal::relay::DEFAULT_RELAY_PORT)
}

fn default_max_clients() -> usize {
    2
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            high_water: default_high_water(),
            low_water: None,
            drain_timeout_ms: default_drain_timeout_ms(),
            max_meta_per_window: default_max_meta(),
            meta_window_secs: default_meta_window_secs(),
        }
    }
}

impl Default for NegotiationSection {
    fn default() -> Self {
        Self {
            gather_timeout_secs: default_gather_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            ice_servers: default_ice_servers(),
        }
    }
}

impl Default for SignalingSection {
    fn default() -> Self {
        Self {
            relay: None,
            bind: default_relay_bind(),
            max_clients: default_max_clients(),
        }
    }
}

impl Default for ReceiveSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read config {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("lanshare/config.toml")
    }

    /// Resolve the configuration to use.
    ///
    /// An explicitly named file must exist; the default file is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if a named file is missing or any file fails to parse.
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Transfer settings for the protocol core
    #[must_use]
    pub fn transfer_config(&self) -> TransferConfig {
        let t = &self.transfer;
        TransferConfig {
            chunk_size: t.chunk_size,
            high_water: t.high_water,
            low_water: t.low_water.unwrap_or(t.high_water / 2),
            drain_timeout: Duration::from_millis(t.drain_timeout_ms),
            max_meta_per_window: t.max_meta_per_window,
            meta_window: Duration::from_secs(t.meta_window_secs),
            ..TransferConfig::default()
        }
    }

    /// Negotiation settings
    #[must_use]
    pub fn negotiation_config(&self) -> NegotiationConfig {
        NegotiationConfig {
            gather_timeout: Duration::from_secs(self.negotiation.gather_timeout_secs),
            connect_timeout: Duration::from_secs(self.negotiation.connect_timeout_secs),
            ice_servers: self.negotiation.ice_servers.clone(),
        }
    }

    /// Relay server settings
    #[must_use]
    pub fn relay_server_config(&self) -> RelayServerConfig {
        RelayServerConfig {
            max_clients: self.signaling.max_clients,
            ..RelayServerConfig::default()
        }
    }

    /// Parse the relay bind address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_relay_bind(&self) -> anyhow::Result<SocketAddr> {
        self.signaling
            .bind
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid relay bind address '{}': {e}", self.signaling.bind))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.transfer_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("[transfer] {e}"))?;
        self.negotiation_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("[negotiation] {e}"))?;

        self.parse_relay_bind()?;
        if self.signaling.max_clients < 2 {
            anyhow::bail!("[signaling] max_clients must be at least 2");
        }
        if let Some(relay) = &self.signaling.relay {
            lanshare_signal::relay::normalize_relay_addr(relay)
                .map_err(|e| anyhow::anyhow!("[signaling] relay: {e}"))?;
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
