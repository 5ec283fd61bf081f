//! Channel ↔ energy and energy ↔ FWHM calibrations.
#![allow(clippy::cast_precision_loss)]

use crate::curve::{Curve, CurveFunction, Polynomial};
use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Highest supported ADC bit depth.
pub const MAX_BITS: u16 = 24;

/// A fitted transform from one scale to another.
///
/// Energy calibrations map channels (at `bits` resolution) to energy;
/// FWHM calibrations map energy to peak width in the same energy units.
/// An invalid calibration transforms as the identity so callers can work
/// in channel units without special cases.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Calibration {
    function: CurveFunction,
    bits: u16,
    units: String,
    valid: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            function: CurveFunction::default(),
            bits: 0,
            units: "channel".to_string(),
            valid: false,
        }
    }
}

impl Calibration {
    /// Creates a calibration from a curve.
    ///
    /// # Errors
    /// Fails when the curve has no coefficients or `bits` is out of range.
    pub fn new(function: CurveFunction, bits: u16, units: impl Into<String>) -> Result<Self> {
        if bits > MAX_BITS {
            return Err(Error::InvalidBits(bits));
        }
        if function.coeff_count() == 0 {
            return Err(Error::CoefficientCount {
                family: function.name(),
                expected: 1,
                actual: 0,
            });
        }
        if function.coeffs().iter().any(|c| !c.is_finite()) {
            return Err(Error::Calibration("non-finite coefficient".to_string()));
        }
        Ok(Self {
            function,
            bits,
            units: units.into(),
            valid: true,
        })
    }

    /// Linear `offset + gain · channel` energy calibration.
    ///
    /// # Errors
    /// Fails when `gain` is not a positive finite number.
    pub fn linear(offset: f64, gain: f64, bits: u16) -> Result<Self> {
        if !(gain.is_finite() && gain > 0.0) {
            return Err(Error::Calibration(format!("gain must be positive, got {gain}")));
        }
        Self::new(
            CurveFunction::Polynomial(Polynomial::new(vec![offset, gain])),
            bits,
            "keV",
        )
    }

    /// Whether the calibration has been established.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Bit depth the calibration was made at.
    #[must_use]
    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// Units of the transformed value.
    #[must_use]
    pub fn units(&self) -> &str {
        &self.units
    }

    /// Underlying curve.
    #[must_use]
    pub fn function(&self) -> &CurveFunction {
        &self.function
    }

    /// Transforms a value; identity when invalid.
    #[must_use]
    pub fn transform(&self, x: f64) -> f64 {
        if self.valid {
            self.function.evaluate(x)
        } else {
            x
        }
    }

    /// Transforms a channel recorded at a different bit depth.
    #[must_use]
    pub fn transform_bits(&self, channel: f64, bits: u16) -> f64 {
        self.transform(self.rescale(channel, bits))
    }

    /// Inverse transform by bracketing over the calibrated channel range.
    ///
    /// Returns `None` when the value lies outside the calibrated range.
    #[must_use]
    pub fn inverse_transform(&self, y: f64) -> Option<f64> {
        if !self.valid {
            return Some(y);
        }
        let hi = if self.bits == 0 {
            f64::from(1u32 << MAX_BITS)
        } else {
            f64::from(1u32 << self.bits.min(MAX_BITS))
        };
        let (lo_val, hi_val) = (self.function.evaluate(0.0), self.function.evaluate(hi));
        if lo_val <= hi_val {
            self.function.inverse(y, 0.0, hi)
        } else {
            self.function.inverse(y, hi, 0.0)
        }
    }

    /// FWHM in channels at `channel`, treating `self` as a FWHM calibration.
    ///
    /// With a valid `energy` calibration the width is evaluated in energy
    /// and mapped back to a channel span; otherwise `self` is read directly
    /// against channels. `None` when either calibration cannot produce a
    /// positive finite width.
    #[must_use]
    pub fn fwhm_channels(&self, energy: &Calibration, channel: f64) -> Option<f64> {
        if !self.valid {
            return None;
        }
        let width = if energy.is_valid() {
            let e = energy.transform(channel);
            let half = 0.5 * self.transform(e);
            let lo = energy.inverse_transform(e - half)?;
            let hi = energy.inverse_transform(e + half)?;
            (hi - lo).abs()
        } else {
            self.transform(channel)
        };
        (width.is_finite() && width > 0.0).then_some(width)
    }

    /// Converts a channel from `bits` resolution to this calibration's.
    #[must_use]
    pub fn rescale(&self, channel: f64, bits: u16) -> f64 {
        if self.bits == 0 || bits == 0 || bits == self.bits {
            return channel;
        }
        let shift = i32::from(self.bits) - i32::from(bits);
        channel * 2f64.powi(shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::SqrtPoly;
    use approx::assert_relative_eq;

    #[test]
    fn test_invalid_is_identity() {
        let cal = Calibration::default();
        assert!(!cal.is_valid());
        assert_relative_eq!(cal.transform(123.4), 123.4);
        assert_eq!(cal.inverse_transform(50.0), Some(50.0));
    }

    #[test]
    fn test_linear_round_trip() {
        let cal = Calibration::linear(1.5, 0.5, 13).unwrap();
        assert_relative_eq!(cal.transform(100.0), 51.5);
        let chan = cal.inverse_transform(51.5).unwrap();
        assert_relative_eq!(chan, 100.0, epsilon = 1e-6);
        assert!(cal.inverse_transform(-100.0).is_none());
    }

    #[test]
    fn test_bits_rescale() {
        let cal = Calibration::linear(0.0, 1.0, 12).unwrap();
        assert_relative_eq!(cal.transform_bits(100.0, 13), 50.0);
        assert_relative_eq!(cal.transform_bits(100.0, 11), 200.0);
        assert_relative_eq!(cal.transform_bits(100.0, 12), 100.0);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(Calibration::linear(0.0, 0.0, 12).is_err());
        assert!(Calibration::linear(0.0, 1.0, 40).is_err());
        assert!(Calibration::new(CurveFunction::SqrtPoly(SqrtPoly::new(vec![])), 0, "keV").is_err());
    }

    #[test]
    fn test_fwhm_channels() {
        let energy = Calibration::linear(0.0, 0.5, 13).unwrap();
        let fwhm = Calibration::new(
            CurveFunction::SqrtPoly(SqrtPoly::new(vec![4.0, 0.0, 0.0])),
            0,
            "keV",
        )
        .unwrap();
        // 2 keV wide at 0.5 keV per channel
        assert_relative_eq!(fwhm.fwhm_channels(&energy, 1000.0).unwrap(), 4.0, epsilon = 1e-6);
        assert_relative_eq!(
            fwhm.fwhm_channels(&Calibration::default(), 1000.0).unwrap(),
            2.0
        );
        assert!(Calibration::default()
            .fwhm_channels(&energy, 1000.0)
            .is_none());
    }
}
