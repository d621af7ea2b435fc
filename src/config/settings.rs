//! Strongly-typed settings loaded through Figment.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::discovery::{ANNOUNCEMENT_DATAGRAM_BYTES, DISCOVERY_PORT};
use crate::error::{AppResult, MinispecError};
use crate::processing::BiasPolicy;

/// Default location of the settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config/minispec.toml";
/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "MINISPEC_";
/// Factory control port of the instrument.
pub const DEFAULT_CONTROL_PORT: u16 = 8000;

/// Top-level client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinispecConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Broadcast discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Control channel settings
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Spectrum post-processing settings
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json_logs: bool,
}

/// Discovery listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port instruments broadcast on
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// Per-receive timeout in milliseconds
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_ms: u64,
    /// Overall search window in milliseconds
    #[serde(default = "default_search_timeout")]
    pub search_timeout_ms: u64,
    /// Receive buffer per datagram; longer announcements are truncated
    #[serde(default = "default_datagram_bytes")]
    pub max_datagram_bytes: usize,
}

/// Control channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// TCP port of the TLS control service
    #[serde(default = "default_control_port")]
    pub port: u16,
    /// TCP connect plus TLS handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Time allowed for each reply in milliseconds
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,
    /// Accept the instrument's self-signed certificate
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
}

/// Spectrum post-processing configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// How the CCD bias is determined for each readout
    #[serde(default)]
    pub bias: BiasPolicy,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}

fn default_socket_timeout() -> u64 {
    1000
}

fn default_search_timeout() -> u64 {
    3000
}

fn default_datagram_bytes() -> usize {
    ANNOUNCEMENT_DATAGRAM_BYTES
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_reply_timeout() -> u64 {
    5000
}

fn default_accept_invalid_certs() -> bool {
    true
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            socket_timeout_ms: default_socket_timeout(),
            search_timeout_ms: default_search_timeout(),
            max_datagram_bytes: default_datagram_bytes(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: default_control_port(),
            connect_timeout_ms: default_connect_timeout(),
            reply_timeout_ms: default_reply_timeout(),
            accept_invalid_certs: default_accept_invalid_certs(),
        }
    }
}

impl DiscoveryConfig {
    /// Per-receive timeout.
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    /// Overall search window.
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

impl ConnectionConfig {
    /// Connect plus handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-reply timeout.
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl MinispecConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file and the environment, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Ports and timeouts are non-zero
    /// - The discovery receive buffer can hold the announcement magic
    /// - A constant bias is a finite number
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(MinispecError::ConfigValidation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.discovery.port == 0 || self.connection.port == 0 {
            return Err(MinispecError::ConfigValidation(
                "Discovery and control ports must be non-zero".to_string(),
            ));
        }

        let timeouts = [
            ("discovery.socket_timeout_ms", self.discovery.socket_timeout_ms),
            ("discovery.search_timeout_ms", self.discovery.search_timeout_ms),
            ("connection.connect_timeout_ms", self.connection.connect_timeout_ms),
            ("connection.reply_timeout_ms", self.connection.reply_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(MinispecError::ConfigValidation(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.discovery.max_datagram_bytes < 8 {
            return Err(MinispecError::ConfigValidation(format!(
                "discovery.max_datagram_bytes {} is too small for an announcement",
                self.discovery.max_datagram_bytes
            )));
        }

        if let BiasPolicy::Constant { value } = self.processing.bias {
            if !value.is_finite() {
                return Err(MinispecError::ConfigValidation(format!(
                    "processing.bias value {} is not finite",
                    value
                )));
            }
        }

        Ok(())
    }
}
