//! Client library for network-attached minispec spectrometers.
//!
//! The crate covers the path from finding an instrument to holding a
//! calibrated spectrum:
//!
//! - [`discovery`]: listen for UDP broadcast announcements
//! - [`session`]: TLS control session with owner/read-only access arbitration
//! - [`protocol`]: command encoding and reply decoding
//! - [`processing`]: active-pixel trimming, bias removal, dark subtraction
//! - [`calibration`]: cubic pixel to wavelength model
//!
//! Settings live in [`config`], logging setup in [`telemetry`].
//!
//! ```no_run
//! use std::time::Duration;
//! use minispec::{find_devices, MinispecConfig, Session};
//!
//! # async fn example() -> minispec::AppResult<()> {
//! let config = MinispecConfig::load()?;
//! minispec::telemetry::init_tracing(&config.application);
//!
//! let devices = find_devices(true, Duration::from_secs(1), Duration::from_secs(3)).await?;
//! if let Some(device) = devices.iter().next() {
//!     let mut session = Session::new(&config);
//!     session.open_device(device).await?;
//!     let spectrum = session.spectrum().await?;
//!     println!("{} points", spectrum.len());
//!     session.release().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod config;
pub mod discovery;
pub mod error;
pub mod processing;
pub mod protocol;
pub mod session;
pub mod telemetry;

pub use calibration::Calibration;
pub use config::MinispecConfig;
pub use discovery::{find_devices, find_devices_with, DeviceAnnouncement};
pub use error::{AppResult, MinispecError};
pub use processing::{BiasPolicy, DarkFrame, RawSpectrum, Spectrum};
pub use session::{AccessMode, Session, SessionState};
