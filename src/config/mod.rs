//! Client configuration.
//!
//! Settings are layered with Figment, lowest to highest precedence:
//! 1. Built-in defaults (factory ports and timeouts)
//! 2. A TOML file (default: `config/minispec.toml`, optional)
//! 3. Environment variables prefixed with `MINISPEC_`
//!
//! # Example
//!
//! ```no_run
//! use minispec::config::MinispecConfig;
//!
//! let config = MinispecConfig::load()?;
//! println!("Control port: {}", config.connection.port);
//! println!("Search window: {:?}", config.discovery.search_timeout());
//! # Ok::<(), minispec::MinispecError>(())
//! ```
//!
//! # Environment Variables
//!
//! Nested keys are separated by a double underscore so that field names keep
//! their own underscores:
//!
//! ```text
//! MINISPEC_APPLICATION__LOG_LEVEL=debug
//! MINISPEC_CONNECTION__REPLY_TIMEOUT_MS=10000
//! MINISPEC_DISCOVERY__SEARCH_TIMEOUT_MS=5000
//! ```

pub mod settings;

pub use settings::{
    ApplicationConfig, ConnectionConfig, DiscoveryConfig, MinispecConfig, ProcessingConfig,
};
