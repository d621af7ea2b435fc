//! Error types for the spectrometer client.
//!
//! This module defines the crate-wide error type, `MinispecError`. Using the
//! `thiserror` crate, it gives every layer (discovery, session, codec,
//! processing, configuration) one consistent way to report failures.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: The secure transport could not be established or broke
//!   mid-exchange (refused, TLS failure, reset, reply timeout). The session that
//!   produced it has already moved to `Unconnected`.
//! - **`Protocol`**: A reply was malformed, truncated, or of the wrong kind for
//!   the outstanding command. Only the current request is aborted; the session
//!   stays open.
//! - **`PermissionDenied`**: A state-changing command was attempted while the
//!   session holds read-only access, either caught locally or reported by the
//!   instrument. Recoverable.
//! - **`Configuration`**: Caller misuse caught locally before any wire traffic,
//!   e.g. a dark frame of the wrong length or a wavelength query with no
//!   calibration loaded.
//! - **`Config`** / **`ConfigValidation`**: Loading or validating settings.
//! - **`Io`**: Local socket setup failures (binding the discovery port).
//!
//! An empty discovery result is not an error and has no variant here.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, MinispecError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum MinispecError {
    /// Transport failed; the session is now unconnected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed or unexpected reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Write attempted without owner access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid argument or missing prerequisite.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Settings could not be read or parsed.
    #[error("Settings load error: {0}")]
    Config(#[from] figment::Error),

    /// Settings parsed but failed validation.
    #[error("Settings validation error: {0}")]
    ConfigValidation(String),

    /// Local socket setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MinispecError {
    /// True for transport failures that left the session unconnected.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// True for reply decoding failures.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// True when a write was refused because the session is read-only.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    /// True for local caller misuse.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
