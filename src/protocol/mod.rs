//! Control-channel vocabulary.
//!
//! The instrument speaks a line-oriented ASCII protocol over TLS. Each command
//! is answered by exactly one reply, and neither carries a request identifier,
//! so a reply can only be attributed to the command immediately before it.
//!
//! | Command          | Request                          | Reply                                   |
//! |------------------|----------------------------------|-----------------------------------------|
//! | `GetStatus`      | `get_status`                     | `status:owner` / `status:read_only`     |
//! | `GetExposure`    | `get_exposure`                   | `exposure:<ms>`                         |
//! | `SetExposure`    | `set_exposure<ms>`               | `exposure:<applied ms>`                 |
//! | `GetCalibration` | `get_calibration`                | `calibration:c1,c2,c3,c4`               |
//! | `SetCalibration` | `set_cal<c1>,<c2>,<c3>,<c4>`     | `calibration:<applied>`                 |
//! | `TakeSpectrum`   | `take_spectrum`                  | `spectrum_complete`                     |
//! | `GetSpectrum`    | `get_spectrum`                   | `spectrum:` + 7388 bytes LE `u16` + LF  |
//! | `SetWifi`        | `set_wifi<ssid>,<key>`           | `wifi:<ssid>`                           |
//!
//! Requests end in CRLF. Any request may instead be answered with
//! `denied[:reason]`.

pub mod codec;

use std::fmt;

use crate::calibration::Calibration;
use crate::processing::RawSpectrum;

pub use codec::{encode, ReplyDecoder, MAX_LINE_BYTES};

/// Access granted to a session by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// First client to connect; may change instrument state.
    Owner,
    /// Any later concurrent client; queries only.
    ReadOnly,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::ReadOnly => write!(f, "read_only"),
        }
    }
}

/// A request to the instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ask which access mode this connection holds.
    GetStatus,
    /// Read the exposure time.
    GetExposure,
    /// Set the exposure time in milliseconds.
    SetExposure(u32),
    /// Read the wavelength calibration.
    GetCalibration,
    /// Replace the wavelength calibration.
    SetCalibration(Calibration),
    /// Run one exposure cycle.
    TakeSpectrum,
    /// Fetch the readout of the last exposure.
    GetSpectrum,
    /// Configure the instrument's WiFi client.
    SetWifi {
        /// Network name.
        ssid: String,
        /// Pre-shared key.
        key: String,
    },
}

impl Command {
    /// Whether the command changes instrument state and so needs `Owner`.
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self,
            Self::SetExposure(_) | Self::SetCalibration(_) | Self::SetWifi { .. }
        )
    }

    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetStatus => "get_status",
            Self::GetExposure => "get_exposure",
            Self::SetExposure(_) => "set_exposure",
            Self::GetCalibration => "get_calibration",
            Self::SetCalibration(_) => "set_cal",
            Self::TakeSpectrum => "take_spectrum",
            Self::GetSpectrum => "get_spectrum",
            Self::SetWifi { .. } => "set_wifi",
        }
    }
}

/// A decoded instrument reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Access mode of this connection.
    Status(AccessMode),
    /// Exposure in milliseconds, as applied by the instrument.
    Exposure(u32),
    /// Calibration, as applied by the instrument.
    Calibration(Calibration),
    /// An exposure cycle finished.
    SpectrumComplete,
    /// A raw detector readout.
    Spectrum(RawSpectrum),
    /// SSID the instrument is now configured for.
    Wifi(String),
    /// The instrument refused the request.
    Denied(Option<String>),
}

impl Reply {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Exposure(_) => "exposure",
            Self::Calibration(_) => "calibration",
            Self::SpectrumComplete => "spectrum_complete",
            Self::Spectrum(_) => "spectrum",
            Self::Wifi(_) => "wifi",
            Self::Denied(_) => "denied",
        }
    }
}
