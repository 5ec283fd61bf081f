//! Inbound histogram data and the trimmed view the engine fits.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::calibration::{Calibration, MAX_BITS};
use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Zero channels kept on either side of the counted range when trimming.
pub const TRIM_PADDING: usize = 8;

/// A one-dimensional energy histogram as delivered by acquisition.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spectrum {
    /// Counts per channel.
    pub counts: Vec<f64>,
    /// ADC resolution.
    pub bits: u16,
    /// Live time accumulator in seconds.
    pub live_seconds: f64,
    /// Real time accumulator in seconds.
    pub real_seconds: f64,
    /// Detector identity.
    pub detector: String,
    /// Channel → energy calibration.
    pub energy_calibration: Calibration,
    /// Energy → FWHM calibration.
    pub fwhm_calibration: Calibration,
}

impl Spectrum {
    /// Creates a spectrum from counts, deriving the bit depth from length.
    ///
    /// # Errors
    /// Fails on an empty histogram or on negative/non-finite counts.
    pub fn new(counts: Vec<f64>) -> Result<Self> {
        if counts.is_empty() {
            return Err(Error::EmptySpectrum);
        }
        if let Some((channel, &value)) = counts
            .iter()
            .enumerate()
            .find(|(_, c)| !c.is_finite() || **c < 0.0)
        {
            return Err(Error::InvalidCount { channel, value });
        }
        let bits = (usize::BITS - (counts.len() - 1).leading_zeros()) as u16;
        Ok(Self {
            counts,
            bits,
            ..Self::default()
        })
    }

    /// Sets the ADC bit depth.
    ///
    /// # Errors
    /// Fails when `bits` exceeds [`MAX_BITS`].
    pub fn with_bits(mut self, bits: u16) -> Result<Self> {
        if bits > MAX_BITS {
            return Err(Error::InvalidBits(bits));
        }
        self.bits = bits;
        Ok(self)
    }

    /// Sets live and real time.
    #[must_use]
    pub fn with_times(mut self, live_seconds: f64, real_seconds: f64) -> Self {
        self.live_seconds = live_seconds;
        self.real_seconds = real_seconds;
        self
    }

    /// Sets the detector name.
    #[must_use]
    pub fn with_detector(mut self, detector: impl Into<String>) -> Self {
        self.detector = detector.into();
        self
    }

    /// Sets the energy calibration.
    #[must_use]
    pub fn with_energy_calibration(mut self, calibration: Calibration) -> Self {
        self.energy_calibration = calibration;
        self
    }

    /// Sets the FWHM calibration.
    #[must_use]
    pub fn with_fwhm_calibration(mut self, calibration: Calibration) -> Self {
        self.fwhm_calibration = calibration;
        self
    }

    /// Total counts.
    #[must_use]
    pub fn total_counts(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Dead time fraction, zero when real time is unknown.
    #[must_use]
    pub fn dead_time_fraction(&self) -> f64 {
        if self.real_seconds > 0.0 {
            ((self.real_seconds - self.live_seconds) / self.real_seconds).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Contiguous x/y arrays over the non-trivial part of a spectrum.
///
/// `x` holds absolute channel numbers, so `x[i] == x[0] + i`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Histogram {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Histogram {
    /// Builds a histogram starting at channel 0 without trimming.
    #[must_use]
    pub fn from_counts(counts: &[f64]) -> Self {
        Self {
            x: (0..counts.len()).map(|i| i as f64).collect(),
            y: counts.to_vec(),
        }
    }

    /// Trims the spectrum to the channels holding counts plus
    /// [`TRIM_PADDING`] channels of margin on each side.
    ///
    /// An all-zero spectrum yields an empty histogram.
    #[must_use]
    pub fn from_spectrum(spectrum: &Spectrum) -> Self {
        let counts = &spectrum.counts;
        let Some(first) = counts.iter().position(|&c| c > 0.0) else {
            return Self::default();
        };
        let last = counts.iter().rposition(|&c| c > 0.0).unwrap_or(first);
        let start = first.saturating_sub(TRIM_PADDING);
        let end = (last + TRIM_PADDING).min(counts.len() - 1);
        Self {
            x: (start..=end).map(|i| i as f64).collect(),
            y: counts[start..=end].to_vec(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// First channel covered.
    #[must_use]
    pub fn first_channel(&self) -> Option<usize> {
        self.x.first().map(|&x| x as usize)
    }

    /// Last channel covered.
    #[must_use]
    pub fn last_channel(&self) -> Option<usize> {
        self.x.last().map(|&x| x as usize)
    }

    /// Index of an absolute channel, if covered.
    #[must_use]
    pub fn index_of(&self, channel: usize) -> Option<usize> {
        let first = self.first_channel()?;
        let index = channel.checked_sub(first)?;
        (index < self.len()).then_some(index)
    }

    /// Counts at an absolute channel, zero outside the histogram.
    #[must_use]
    pub fn counts_at(&self, channel: usize) -> f64 {
        self.index_of(channel).map_or(0.0, |i| self.y[i])
    }

    /// Clamps an inclusive channel range to the covered channels.
    #[must_use]
    pub fn clamp_range(&self, left: usize, right: usize) -> Option<(usize, usize)> {
        let first = self.first_channel()?;
        let last = self.last_channel()?;
        let (l, r) = (left.max(first), right.min(last));
        (l <= r).then_some((l, r))
    }

    /// x and y slices for an inclusive channel range.
    #[must_use]
    pub fn window(&self, left: usize, right: usize) -> Option<(&[f64], &[f64])> {
        let (l, r) = self.clamp_range(left, right)?;
        let (li, ri) = (self.index_of(l)?, self.index_of(r)?);
        Some((&self.x[li..=ri], &self.y[li..=ri]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak_spectrum() -> Spectrum {
        let mut counts = vec![0.0; 50];
        counts.extend([5.0, 20.0, 80.0, 200.0, 80.0, 20.0, 5.0]);
        counts.extend(vec![0.0; 50]);
        Spectrum::new(counts).unwrap()
    }

    #[test]
    fn test_spectrum_validation() {
        assert_eq!(Spectrum::new(vec![]), Err(Error::EmptySpectrum));
        assert!(matches!(
            Spectrum::new(vec![1.0, -1.0]),
            Err(Error::InvalidCount { channel: 1, .. })
        ));
        let spectrum = Spectrum::new(vec![0.0; 1024]).unwrap();
        assert_eq!(spectrum.bits, 10);
        assert!(spectrum.clone().with_bits(30).is_err());
    }

    #[test]
    fn test_trim_keeps_padding() {
        let hist = Histogram::from_spectrum(&peak_spectrum());
        assert_eq!(hist.first_channel(), Some(50 - TRIM_PADDING));
        assert_eq!(hist.last_channel(), Some(56 + TRIM_PADDING));
        assert_eq!(hist.index_of(53), Some(53 - (50 - TRIM_PADDING)));
        assert!((hist.counts_at(53) - 200.0).abs() < f64::EPSILON);
        assert!(hist.index_of(10).is_none());
    }

    #[test]
    fn test_all_zero_spectrum_is_empty() {
        let spectrum = Spectrum::new(vec![0.0; 64]).unwrap();
        assert!(Histogram::from_spectrum(&spectrum).is_empty());
    }

    #[test]
    fn test_window_clamps() {
        let hist = Histogram::from_counts(&[1.0, 2.0, 3.0, 4.0]);
        let (x, y) = hist.window(2, 10).unwrap();
        assert_eq!(x, &[2.0, 3.0]);
        assert_eq!(y, &[3.0, 4.0]);
        assert!(hist.window(5, 10).is_none());
    }

    #[test]
    fn test_dead_time() {
        let spectrum = peak_spectrum().with_times(90.0, 100.0);
        assert!((spectrum.dead_time_fraction() - 0.1).abs() < 1e-12);
        assert_eq!(peak_spectrum().dead_time_fraction(), 0.0);
        assert_eq!(spectrum.total_counts(), 410.0);
    }
}
