//! Raw detector readout to usable spectrum.
//!
//! The linear CCD reports [`RAW_PIXELS`] 16-bit counts per exposure. The
//! leading [`ACTIVE_PIXEL_OFFSET`] of those are light-shielded or otherwise not
//! photosensitive and are dropped. The remaining [`SPECTRUM_PIXELS`] counts have
//! the sensor's fixed voltage offset (bias) removed and, optionally, a dark
//! frame subtracted.
//!
//! Results are not clamped: negative values after dark subtraction are noise
//! and carry information.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, MinispecError};

/// Length of a raw readout, including non-active pixels.
pub const RAW_PIXELS: usize = 3694;
/// Length of a processed spectrum.
pub const SPECTRUM_PIXELS: usize = 3648;
/// Leading raw pixels that are dropped before processing.
pub const ACTIVE_PIXEL_OFFSET: usize = RAW_PIXELS - SPECTRUM_PIXELS;
/// Light-shielded dummy pixels whose mean tracks the CCD voltage offset.
pub const SHIELDED_PIXELS: Range<usize> = 17..30;

/// A full detector readout of exactly [`RAW_PIXELS`] counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSpectrum(Vec<u16>);

impl RawSpectrum {
    /// Size of a readout on the wire (little-endian `u16` per pixel).
    pub const WIRE_BYTES: usize = RAW_PIXELS * 2;

    /// Decode a little-endian readout. `None` unless exactly [`Self::WIRE_BYTES`] long.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::WIRE_BYTES {
            return None;
        }
        let counts = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Some(Self(counts))
    }

    /// Encode as little-endian bytes, the instrument's wire layout.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|count| count.to_le_bytes()).collect()
    }

    /// All counts, shielded pixels included.
    pub fn counts(&self) -> &[u16] {
        &self.0
    }

    /// The photosensitive counts, `counts()[ACTIVE_PIXEL_OFFSET..]`.
    pub fn active(&self) -> &[u16] {
        &self.0[ACTIVE_PIXEL_OFFSET..]
    }

    /// Consume into the underlying counts.
    pub fn into_inner(self) -> Vec<u16> {
        self.0
    }
}

impl TryFrom<Vec<u16>> for RawSpectrum {
    type Error = MinispecError;

    fn try_from(counts: Vec<u16>) -> AppResult<Self> {
        if counts.len() != RAW_PIXELS {
            return Err(MinispecError::Configuration(format!(
                "raw spectrum must have {} pixels, got {}",
                RAW_PIXELS,
                counts.len()
            )));
        }
        Ok(Self(counts))
    }
}

/// A processed spectrum of exactly [`SPECTRUM_PIXELS`] values.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum(Vec<f64>);

impl Spectrum {
    /// Processed values, one per active pixel.
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Number of values (always [`SPECTRUM_PIXELS`]).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true for a valid spectrum; provided for API completeness.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the underlying values.
    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }
}

impl AsRef<[f64]> for Spectrum {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// A stored dark spectrum, subtracted from every later acquisition.
///
/// Only meaningful for the exposure it was captured at; keeping the two in
/// step is up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct DarkFrame(Vec<f64>);

impl DarkFrame {
    /// Dark values, one per active pixel.
    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

impl TryFrom<Vec<f64>> for DarkFrame {
    type Error = MinispecError;

    fn try_from(values: Vec<f64>) -> AppResult<Self> {
        check_dark_len(values.len())?;
        Ok(Self(values))
    }
}

impl From<Spectrum> for DarkFrame {
    fn from(spectrum: Spectrum) -> Self {
        Self(spectrum.0)
    }
}

/// Where the bias subtracted from each readout comes from.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BiasPolicy {
    /// Mean of the light-shielded pixels of the same readout.
    #[default]
    ShieldedPixels,
    /// A fixed count offset.
    Constant {
        /// Counts subtracted from every active pixel.
        value: f64,
    },
}

impl BiasPolicy {
    /// Bias to subtract from `raw` under this policy.
    pub fn bias_for(&self, raw: &RawSpectrum) -> f64 {
        match self {
            Self::ShieldedPixels => estimate_bias(raw),
            Self::Constant { value } => *value,
        }
    }
}

/// Mean count of the shielded dummy pixels.
pub fn estimate_bias(raw: &RawSpectrum) -> f64 {
    let shielded = &raw.counts()[SHIELDED_PIXELS];
    let sum: f64 = shielded.iter().map(|&count| f64::from(count)).sum();
    sum / shielded.len() as f64
}

/// Turn a raw readout into a spectrum.
///
/// Drops the non-active leading pixels, subtracts `bias`, then subtracts
/// `dark` elementwise if given. A dark frame of any length other than
/// [`SPECTRUM_PIXELS`] is rejected.
pub fn process(raw: &RawSpectrum, bias: f64, dark: Option<&[f64]>) -> AppResult<Spectrum> {
    let mut values: Vec<f64> = raw
        .active()
        .iter()
        .map(|&count| f64::from(count) - bias)
        .collect();

    if let Some(dark) = dark {
        check_dark_len(dark.len())?;
        for (value, dark) in values.iter_mut().zip(dark) {
            *value -= dark;
        }
    }

    Ok(Spectrum(values))
}

/// [`process`] with the bias chosen by `policy`.
pub fn process_with_policy(
    raw: &RawSpectrum,
    policy: &BiasPolicy,
    dark: Option<&DarkFrame>,
) -> AppResult<Spectrum> {
    process(raw, policy.bias_for(raw), dark.map(DarkFrame::values))
}

fn check_dark_len(len: usize) -> AppResult<()> {
    if len != SPECTRUM_PIXELS {
        return Err(MinispecError::Configuration(format!(
            "dark frame must have {} values, got {}",
            SPECTRUM_PIXELS, len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Readout with a recognisable ramp: pixel i reads 1000 + i (mod 4096).
    fn ramp() -> RawSpectrum {
        let counts: Vec<u16> = (0..RAW_PIXELS).map(|i| 1000 + (i % 4096) as u16).collect();
        RawSpectrum::try_from(counts).unwrap()
    }

    #[test]
    fn test_offset_invariant() {
        assert_eq!(RAW_PIXELS - SPECTRUM_PIXELS, ACTIVE_PIXEL_OFFSET);
        assert_eq!(ACTIVE_PIXEL_OFFSET, 46);
    }

    #[test]
    fn test_process_without_dark() {
        let raw = ramp();
        let spectrum = process(&raw, 12.5, None).unwrap();
        assert_eq!(spectrum.len(), SPECTRUM_PIXELS);
        for (i, value) in spectrum.values().iter().enumerate() {
            let expected = f64::from(raw.counts()[ACTIVE_PIXEL_OFFSET + i]) - 12.5;
            assert_eq!(*value, expected);
        }
    }

    #[test]
    fn test_process_with_dark_is_difference() {
        let raw = ramp();
        let dark: Vec<f64> = (0..SPECTRUM_PIXELS).map(|i| (i % 7) as f64 * 3.0).collect();
        let plain = process(&raw, 100.0, None).unwrap();
        let darked = process(&raw, 100.0, Some(&dark)).unwrap();
        for i in 0..SPECTRUM_PIXELS {
            assert_eq!(darked.values()[i], plain.values()[i] - dark[i]);
        }
    }

    #[test]
    fn test_negative_values_are_kept() {
        let raw = RawSpectrum::try_from(vec![10u16; RAW_PIXELS]).unwrap();
        let dark = vec![25.0; SPECTRUM_PIXELS];
        let spectrum = process(&raw, 0.0, Some(&dark)).unwrap();
        assert!(spectrum.values().iter().all(|&v| v == -15.0));
    }

    #[test]
    fn test_wrong_dark_length_is_configuration_error() {
        let raw = ramp();
        let short = vec![0.0; SPECTRUM_PIXELS - 1];
        let err = process(&raw, 0.0, Some(&short)).unwrap_err();
        assert!(err.is_configuration());

        assert!(DarkFrame::try_from(vec![0.0; SPECTRUM_PIXELS + 1]).is_err());
        assert!(DarkFrame::try_from(vec![0.0; SPECTRUM_PIXELS]).is_ok());
    }

    #[test]
    fn test_raw_length_checked() {
        let err = RawSpectrum::try_from(vec![0u16; 10]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_shielded_bias_estimate() {
        let mut counts = vec![0u16; RAW_PIXELS];
        for (offset, count) in counts[SHIELDED_PIXELS].iter_mut().enumerate() {
            *count = 600 + offset as u16;
        }
        let raw = RawSpectrum::try_from(counts).unwrap();
        // 600..=612, mean 606
        assert_eq!(estimate_bias(&raw), 606.0);
        assert_eq!(BiasPolicy::ShieldedPixels.bias_for(&raw), 606.0);
        assert_eq!(BiasPolicy::Constant { value: 3.0 }.bias_for(&raw), 3.0);
    }

    #[test]
    fn test_wire_bytes() {
        let raw = ramp();
        let bytes = raw.to_le_bytes();
        assert_eq!(bytes.len(), RawSpectrum::WIRE_BYTES);
        assert_eq!(&bytes[..2], &1000u16.to_le_bytes());
        assert_eq!(RawSpectrum::from_le_bytes(&bytes), Some(raw));
        assert!(RawSpectrum::from_le_bytes(&bytes[1..]).is_none());
    }
}
