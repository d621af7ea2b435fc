//! Pixel-to-wavelength calibration.
//!
//! The instrument stores a cubic polynomial per detector:
//!
//! ```text
//! λ(i) = c4 + c3·i + c2·i² + c1·i³      (nanometres)
//! ```
//!
//! `c4` is therefore the wavelength of pixel 0. All arithmetic is `f64`; the
//! cubic term at pixel ~3600 is around 5e10 times `c1`, which single precision
//! would visibly truncate.

use serde::{Deserialize, Serialize};

/// Cubic wavelength calibration, highest-degree coefficient first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Cubic coefficient.
    pub c1: f64,
    /// Quadratic coefficient.
    pub c2: f64,
    /// Linear coefficient (nm per pixel).
    pub c3: f64,
    /// Constant term, the wavelength of pixel 0 in nm.
    pub c4: f64,
}

impl Calibration {
    /// Number of coefficients in a calibration.
    pub const COEFFICIENTS: usize = 4;

    /// Create a calibration from its four coefficients.
    pub fn new(c1: f64, c2: f64, c3: f64, c4: f64) -> Self {
        Self { c1, c2, c3, c4 }
    }

    /// Build from the leading four values of a coefficient list.
    ///
    /// Extra trailing values are ignored; fewer than four yields `None`.
    pub fn from_coefficients(values: &[f64]) -> Option<Self> {
        match values {
            [c1, c2, c3, c4, ..] => Some(Self::new(*c1, *c2, *c3, *c4)),
            _ => None,
        }
    }

    /// Coefficients in wire order `[c1, c2, c3, c4]`.
    pub fn coefficients(&self) -> [f64; 4] {
        [self.c1, self.c2, self.c3, self.c4]
    }

    /// True when every coefficient is a finite number.
    pub fn is_finite(&self) -> bool {
        self.coefficients().iter().all(|c| c.is_finite())
    }

    /// Wavelength in nm of a single pixel.
    pub fn wavelength(&self, pixel: usize) -> f64 {
        wavelength(pixel, self)
    }

    /// Wavelengths in nm of pixels `0..pixel_count`.
    pub fn wavelengths(&self, pixel_count: usize) -> Vec<f64> {
        wavelengths(self, pixel_count)
    }
}

/// Evaluate the calibration polynomial at `pixel`.
pub fn wavelength(pixel: usize, calibration: &Calibration) -> f64 {
    let i = pixel as f64;
    // Horner form of c4 + c3*i + c2*i^2 + c1*i^3
    calibration.c4 + i * (calibration.c3 + i * (calibration.c2 + i * calibration.c1))
}

/// Ordered wavelength axis for pixels `0..pixel_count`.
pub fn wavelengths(calibration: &Calibration, pixel_count: usize) -> Vec<f64> {
    (0..pixel_count)
        .map(|pixel| wavelength(pixel, calibration))
        .collect()
}
