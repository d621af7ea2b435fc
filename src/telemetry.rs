//! Logging setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the application. [`init_tracing`] is a convenience that honours `RUST_LOG`
//! and falls back to `application.log_level` from the settings.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;

/// Install a global fmt subscriber.
///
/// Returns false if a subscriber was already installed, which is not an error.
pub fn init_tracing(config: &ApplicationConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("minispec={}", config.log_level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_logs {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(level = %config.log_level, json = config.json_logs, "Tracing initialized");
    }
    installed
}
