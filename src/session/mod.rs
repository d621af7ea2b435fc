//! Control session with one instrument.
//!
//! # State machine
//!
//! ```text
//! Unconnected ──open()──▶ Opening ──status reply──▶ Owner | ReadOnly
//!      ▲                     │                           │
//!      └──── release() / transport failure ◀─────────────┘
//! ```
//!
//! Access is arbitrated by the instrument: the first client to connect is the
//! `Owner`, every later concurrent client is `ReadOnly`. The session only
//! reflects what the instrument reports, either through the status reply
//! during `open()` or by a `denied` reply to a write, which demotes the
//! session to `ReadOnly`. Writes attempted while `ReadOnly` are refused
//! locally with [`MinispecError::PermissionDenied`] without touching the wire.
//!
//! # Serialization
//!
//! Replies carry no request identifier, so at most one exchange may be in
//! flight. Every request method takes `&mut self`; sharing a session between
//! tasks needs an outer lock (e.g. `Arc<tokio::sync::Mutex<Session>>`).
//!
//! # Example
//!
//! ```no_run
//! use minispec::{MinispecConfig, Session};
//!
//! # async fn example() -> minispec::AppResult<()> {
//! let config = MinispecConfig::default();
//! let mut session = Session::new(&config);
//! let mode = session.open("192.168.1.20").await?;
//! println!("Connected as {}", mode);
//!
//! let applied = session.set_exposure(10).await?;
//! let spectrum = session.spectrum().await?;
//! let axis = session.wavelengths()?;
//! println!("{} ms exposure, {} points from {:.1} nm", applied, spectrum.len(), axis[0]);
//!
//! session.release().await;
//! # Ok(())
//! # }
//! ```

pub mod transport;

use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use crate::calibration::Calibration;
use crate::config::{ConnectionConfig, MinispecConfig};
use crate::discovery::DeviceAnnouncement;
use crate::error::{AppResult, MinispecError};
use crate::processing::{
    process_with_policy, BiasPolicy, DarkFrame, RawSpectrum, Spectrum, SPECTRUM_PIXELS,
};
use crate::protocol::{encode, Command, Reply, ReplyDecoder};

pub use crate::protocol::AccessMode;
pub use transport::{connect_tls, BoxedStream, ControlStream};

/// Receive buffer headroom reserved before each read.
const READ_CHUNK: usize = 8 * 1024;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport.
    Unconnected,
    /// Transport up, access mode not yet known.
    Opening,
    /// Connected with write access.
    Owner,
    /// Connected with query-only access.
    ReadOnly,
}

impl SessionState {
    /// Access mode, if the session is fully open.
    pub fn access_mode(&self) -> Option<AccessMode> {
        match self {
            Self::Owner => Some(AccessMode::Owner),
            Self::ReadOnly => Some(AccessMode::ReadOnly),
            Self::Unconnected | Self::Opening => None,
        }
    }
}

impl From<AccessMode> for SessionState {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Owner => Self::Owner,
            AccessMode::ReadOnly => Self::ReadOnly,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => write!(f, "unconnected"),
            Self::Opening => write!(f, "opening"),
            Self::Owner => write!(f, "owner"),
            Self::ReadOnly => write!(f, "read_only"),
        }
    }
}

/// A control session with one spectrometer.
pub struct Session {
    address: Option<String>,
    state: SessionState,
    stream: Option<BoxedStream>,
    buffer: BytesMut,
    decoder: ReplyDecoder,
    connection: ConnectionConfig,
    bias: BiasPolicy,
    calibration: Option<Calibration>,
    exposure_ms: Option<u32>,
    dark: Option<DarkFrame>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("calibration", &self.calibration)
            .field("exposure_ms", &self.exposure_ms)
            .field("dark", &self.dark.is_some())
            .finish()
    }
}

impl Session {
    /// Create an unconnected session using the connection and processing settings.
    pub fn new(config: &MinispecConfig) -> Self {
        Self {
            address: None,
            state: SessionState::Unconnected,
            stream: None,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            decoder: ReplyDecoder::new(),
            connection: config.connection.clone(),
            bias: config.processing.bias,
            calibration: None,
            exposure_ms: None,
            dark: None,
        }
    }

    /// Build a session and run the open handshake over `stream`.
    pub async fn from_stream<S>(
        address: impl Into<String>,
        stream: S,
        config: &MinispecConfig,
    ) -> AppResult<Self>
    where
        S: ControlStream + 'static,
    {
        let mut session = Self::new(config);
        session.open_stream(address, stream).await?;
        Ok(session)
    }

    /// Connect over TLS to `host` on the configured control port.
    ///
    /// Learns the access mode from the instrument, then loads the calibration.
    /// A calibration query that fails with anything but a transport error
    /// leaves the calibration unset and the session open.
    pub async fn open(&mut self, host: &str) -> AppResult<AccessMode> {
        self.ensure_closed()?;
        let address = transport::display_address(host, self.connection.port);
        info!(address = %address, "Opening spectrometer session");
        self.address = Some(address);
        self.state = SessionState::Opening;

        let stream = match connect_tls(host, &self.connection).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Failed to connect");
                self.reset();
                return Err(e);
            }
        };
        self.handshake(stream).await
    }

    /// Connect to a discovered instrument.
    pub async fn open_device(&mut self, device: &DeviceAnnouncement) -> AppResult<AccessMode> {
        self.open(&device.host().to_string()).await
    }

    /// Run the open handshake over a caller-supplied stream.
    ///
    /// `address` is only used for logging and [`Session::address`].
    pub async fn open_stream<S>(&mut self, address: impl Into<String>, stream: S) -> AppResult<AccessMode>
    where
        S: ControlStream + 'static,
    {
        self.ensure_closed()?;
        self.address = Some(address.into());
        self.state = SessionState::Opening;
        self.handshake(Box::new(stream)).await
    }

    /// Close the transport and return to `Unconnected`.
    ///
    /// Safe to call at any time, including on a session that is already
    /// closed. The dark frame and cached values do not survive.
    pub async fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            match tokio::time::timeout(self.connection.reply_timeout(), stream.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Transport shutdown failed"),
                Err(_) => debug!("Transport shutdown timed out"),
            }
            info!(address = %self.label(), "Session released");
        }
        self.reset();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Access mode, if open.
    pub fn access_mode(&self) -> Option<AccessMode> {
        self.state.access_mode()
    }

    /// True when the session is open in either access mode.
    pub fn is_connected(&self) -> bool {
        self.access_mode().is_some()
    }

    /// `host:port` of the instrument, while a connection is open or opening.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Last exposure the instrument reported, without any I/O.
    pub fn exposure(&self) -> Option<u32> {
        self.exposure_ms
    }

    /// Last calibration the instrument reported, without any I/O.
    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    /// Dark frame currently subtracted from spectra.
    pub fn dark(&self) -> Option<&DarkFrame> {
        self.dark.as_ref()
    }

    /// Bias policy used by [`Session::spectrum`].
    pub fn bias_policy(&self) -> BiasPolicy {
        self.bias
    }

    /// Change the bias policy used by [`Session::spectrum`].
    pub fn set_bias_policy(&mut self, bias: BiasPolicy) {
        self.bias = bias;
    }

    /// Query the exposure time in milliseconds.
    pub async fn get_exposure(&mut self) -> AppResult<u32> {
        self.ensure_connected()?;
        let command = Command::GetExposure;
        match self.exchange(&command).await? {
            Reply::Exposure(ms) => {
                self.exposure_ms = Some(ms);
                Ok(ms)
            }
            other => Err(unexpected(&command, &other)),
        }
    }

    /// Set the exposure time. Returns the value the instrument applied.
    pub async fn set_exposure(&mut self, exposure_ms: u32) -> AppResult<u32> {
        self.ensure_owner()?;
        let command = Command::SetExposure(exposure_ms);
        match self.exchange(&command).await? {
            Reply::Exposure(applied) => {
                if applied != exposure_ms {
                    debug!(requested = exposure_ms, applied, "Instrument adjusted exposure");
                }
                self.exposure_ms = Some(applied);
                Ok(applied)
            }
            other => Err(unexpected(&command, &other)),
        }
    }

    /// Query the wavelength calibration.
    pub async fn get_calibration(&mut self) -> AppResult<Calibration> {
        self.ensure_connected()?;
        let command = Command::GetCalibration;
        match self.exchange(&command).await? {
            Reply::Calibration(calibration) => {
                self.calibration = Some(calibration);
                Ok(calibration)
            }
            other => Err(unexpected(&command, &other)),
        }
    }

    /// Replace the wavelength calibration. Returns the calibration the instrument applied.
    pub async fn set_calibration(&mut self, calibration: Calibration) -> AppResult<Calibration> {
        if !calibration.is_finite() {
            return Err(MinispecError::Configuration(format!(
                "calibration coefficients must be finite, got {:?}",
                calibration.coefficients()
            )));
        }
        self.ensure_owner()?;
        let command = Command::SetCalibration(calibration);
        match self.exchange(&command).await? {
            Reply::Calibration(applied) => {
                self.calibration = Some(applied);
                Ok(applied)
            }
            other => Err(unexpected(&command, &other)),
        }
    }

    /// Point the instrument's WiFi client at another network.
    ///
    /// Returns the SSID the instrument reports. The change takes effect on the
    /// instrument's side and may drop this connection.
    pub async fn set_wifi(&mut self, ssid: &str, key: &str) -> AppResult<String> {
        validate_wifi_field("ssid", ssid)?;
        validate_wifi_field("key", key)?;
        if ssid.is_empty() {
            return Err(MinispecError::Configuration("ssid must not be empty".to_string()));
        }
        self.ensure_owner()?;
        let command = Command::SetWifi {
            ssid: ssid.to_string(),
            key: key.to_string(),
        };
        match self.exchange(&command).await? {
            Reply::Wifi(applied) => {
                info!(ssid = %applied, "Instrument WiFi reconfigured");
                Ok(applied)
            }
            other => Err(unexpected(&command, &other)),
        }
    }

    /// Run one exposure and fetch the full detector readout.
    ///
    /// The exposure reply is allowed the exposure time on top of the normal
    /// reply timeout. If no exposure is cached yet it is queried first.
    pub async fn raw_spectrum(&mut self) -> AppResult<RawSpectrum> {
        self.ensure_connected()?;

        let exposure_ms = match self.exposure_ms {
            Some(ms) => ms,
            None => self.get_exposure().await?,
        };
        let budget = self.connection.reply_timeout() + Duration::from_millis(u64::from(exposure_ms));

        let take = Command::TakeSpectrum;
        match self.exchange_within(&take, budget).await? {
            Reply::SpectrumComplete => {}
            other => return Err(unexpected(&take, &other)),
        }

        let fetch = Command::GetSpectrum;
        match self.exchange(&fetch).await? {
            Reply::Spectrum(raw) => Ok(raw),
            other => Err(unexpected(&fetch, &other)),
        }
    }

    /// Run one exposure and return the processed spectrum.
    ///
    /// Bias comes from the session's [`BiasPolicy`]; the dark frame, if set,
    /// is subtracted.
    pub async fn spectrum(&mut self) -> AppResult<Spectrum> {
        let raw = self.raw_spectrum().await?;
        process_with_policy(&raw, &self.bias, self.dark.as_ref())
    }

    /// Store a dark frame to subtract from later spectra.
    ///
    /// The frame must have exactly [`SPECTRUM_PIXELS`] values. It stays valid
    /// only for the exposure it was captured at.
    pub fn set_dark(&mut self, frame: Vec<f64>) -> AppResult<()> {
        self.ensure_connected()?;
        self.dark = Some(DarkFrame::try_from(frame)?);
        debug!("Dark frame set");
        Ok(())
    }

    /// Stop subtracting a dark frame.
    pub fn clear_dark(&mut self) {
        if self.dark.take().is_some() {
            debug!("Dark frame cleared");
        }
    }

    /// Wavelength in nm of one pixel of the processed spectrum.
    pub fn wavelength(&self, pixel: usize) -> AppResult<f64> {
        Ok(self.require_calibration()?.wavelength(pixel))
    }

    /// Wavelength axis for the processed spectrum.
    pub fn wavelengths(&self) -> AppResult<Vec<f64>> {
        Ok(self.require_calibration()?.wavelengths(SPECTRUM_PIXELS))
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn handshake(&mut self, stream: BoxedStream) -> AppResult<AccessMode> {
        self.stream = Some(stream);
        self.buffer.clear();
        self.decoder.reset();
        self.calibration = None;
        self.exposure_ms = None;
        self.dark = None;

        // Firmware without a status query is assumed to grant ownership; a
        // later `denied` reply demotes the session.
        let command = Command::GetStatus;
        let mode = match self.exchange(&command).await {
            Ok(Reply::Status(mode)) => mode,
            Ok(other) => {
                warn!(reply = other.name(), "Unexpected status reply; assuming owner access");
                AccessMode::Owner
            }
            Err(e) if e.is_permission_denied() => {
                debug!(error = %e, "Status query refused; assuming read-only access");
                AccessMode::ReadOnly
            }
            Err(e) if e.is_protocol() => {
                warn!(error = %e, "Status query not understood; assuming owner access");
                AccessMode::Owner
            }
            Err(e) => {
                self.drop_transport();
                return Err(e);
            }
        };
        self.state = mode.into();
        info!(address = %self.label(), mode = %mode, "Session open");

        match self.get_calibration().await {
            Ok(calibration) => debug!(?calibration, "Calibration loaded"),
            Err(e) if e.is_connection() => return Err(e),
            Err(e) => warn!(error = %e, "Calibration unavailable; wavelength queries will fail"),
        }

        Ok(mode)
    }

    /// Send one command and wait up to the reply timeout for its reply.
    async fn exchange(&mut self, command: &Command) -> AppResult<Reply> {
        let reply_timeout = self.connection.reply_timeout();
        self.exchange_within(command, reply_timeout).await
    }

    async fn exchange_within(&mut self, command: &Command, reply_timeout: Duration) -> AppResult<Reply> {
        let deadline = tokio::time::Instant::now() + reply_timeout;

        let Some(stream) = self.stream.as_mut() else {
            return Err(not_connected());
        };
        trace!(command = command.name(), "Sending command");
        let sent = write_frame(stream, &encode(command)).await;
        if let Err(e) = sent {
            self.drop_transport();
            return Err(MinispecError::Connection(format!(
                "failed to send {}: {}",
                command.name(),
                e
            )));
        }

        loop {
            match self.decoder.decode(&mut self.buffer) {
                Ok(Some(reply)) => {
                    trace!(command = command.name(), reply = reply.name(), "Received reply");
                    return self.check_denied(command, reply);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(command = command.name(), error = %e, "Malformed reply");
                    return Err(e);
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(not_connected());
            };
            self.buffer.reserve(READ_CHUNK);
            let read = tokio::time::timeout_at(deadline, stream.read_buf(&mut self.buffer)).await;
            let failure = match read {
                Ok(Ok(0)) => "instrument closed the connection".to_string(),
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => format!("read failed: {}", e),
                Err(_) => format!("no reply within {:?}", reply_timeout),
            };
            self.drop_transport();
            return Err(MinispecError::Connection(format!(
                "{} while waiting for reply to {}",
                failure,
                command.name()
            )));
        }
    }

    fn check_denied(&mut self, command: &Command, reply: Reply) -> AppResult<Reply> {
        let reason = match reply {
            Reply::Denied(reason) => reason,
            other => return Ok(other),
        };
        if command.is_state_changing() && self.state == SessionState::Owner {
            warn!(command = command.name(), "Instrument refused write; session is read-only");
            self.state = SessionState::ReadOnly;
        }
        let reason = reason.map(|r| format!(": {}", r)).unwrap_or_default();
        Err(MinispecError::PermissionDenied(format!(
            "{} refused by instrument{}",
            command.name(),
            reason
        )))
    }

    fn ensure_closed(&self) -> AppResult<()> {
        if self.state == SessionState::Unconnected {
            Ok(())
        } else {
            Err(MinispecError::Configuration(format!(
                "session to {} is already {}; release it first",
                self.label(),
                self.state
            )))
        }
    }

    fn ensure_connected(&self) -> AppResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(not_connected())
        }
    }

    fn ensure_owner(&self) -> AppResult<()> {
        match self.state {
            SessionState::Owner => Ok(()),
            SessionState::ReadOnly => Err(MinispecError::PermissionDenied(format!(
                "session to {} is read-only",
                self.label()
            ))),
            SessionState::Unconnected | SessionState::Opening => Err(not_connected()),
        }
    }

    fn require_calibration(&self) -> AppResult<&Calibration> {
        self.calibration.as_ref().ok_or_else(|| {
            MinispecError::Configuration(
                "no calibration loaded; open a session or call set_calibration first".to_string(),
            )
        })
    }

    /// Transport is unusable: forget it and everything scoped to it.
    fn drop_transport(&mut self) {
        if self.stream.take().is_some() {
            warn!(address = %self.label(), "Transport lost; session closed");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.stream = None;
        self.buffer.clear();
        self.decoder.reset();
        self.state = SessionState::Unconnected;
        self.address = None;
        self.calibration = None;
        self.exposure_ms = None;
        self.dark = None;
    }

    fn label(&self) -> &str {
        self.address.as_deref().unwrap_or("<unconnected>")
    }
}

async fn write_frame(stream: &mut BoxedStream, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(bytes).await?;
    stream.flush().await
}

fn validate_wifi_field(name: &str, value: &str) -> AppResult<()> {
    if value.contains([',', '\r', '\n']) {
        return Err(MinispecError::Configuration(format!(
            "{} must not contain ',', CR or LF",
            name
        )));
    }
    Ok(())
}

fn not_connected() -> MinispecError {
    MinispecError::Connection("session is not connected".to_string())
}

fn unexpected(command: &Command, reply: &Reply) -> MinispecError {
    MinispecError::Protocol(format!(
        "unexpected '{}' reply to {}",
        reply.name(),
        command.name()
    ))
}
