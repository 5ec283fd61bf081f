//! Fit settings snapshot threaded through every fitting step.

use crate::calibration::Calibration;
use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Initial value and bounds of one shape parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParamBounds {
    pub initial: f64,
    pub lower: f64,
    pub upper: f64,
    /// Hold the parameter at `initial` during fits.
    #[cfg_attr(feature = "serde", serde(default))]
    pub fixed: bool,
}

impl ParamBounds {
    #[must_use]
    pub const fn new(initial: f64, lower: f64, upper: f64) -> Self {
        Self {
            initial,
            lower,
            upper,
            fixed: false,
        }
    }

    /// Returns a copy held at its initial value.
    #[must_use]
    pub const fn fixed(self) -> Self {
        Self {
            fixed: true,
            ..self
        }
    }

    fn check(&self, name: &'static str) -> Result<()> {
        if self.lower < self.upper && (self.lower..=self.upper).contains(&self.initial) {
            Ok(())
        } else {
            Err(Error::InvalidSetting {
                name,
                reason: format!(
                    "{} not within [{}, {}]",
                    self.initial, self.lower, self.upper
                ),
            })
        }
    }
}

/// Enable flag plus amplitude and slope bounds of a Hypermet term.
///
/// Amplitude and slope can each be fixed through [`ParamBounds::fixed`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TermSettings {
    pub enabled: bool,
    pub amplitude: ParamBounds,
    pub slope: ParamBounds,
}

/// Per-term configuration of the Hypermet shape.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HypermetTerms {
    pub left_skew: TermSettings,
    pub right_skew: TermSettings,
    pub tail: TermSettings,
    /// Step has no slope; only `amplitude` is used.
    pub step: TermSettings,
}

impl Default for HypermetTerms {
    fn default() -> Self {
        Self {
            left_skew: TermSettings {
                enabled: true,
                amplitude: ParamBounds::new(0.05, 1e-4, 0.75),
                slope: ParamBounds::new(0.5, 0.2, 2.0),
            },
            right_skew: TermSettings {
                enabled: false,
                amplitude: ParamBounds::new(0.05, 1e-4, 0.75),
                slope: ParamBounds::new(0.5, 0.2, 2.0),
            },
            tail: TermSettings {
                enabled: false,
                amplitude: ParamBounds::new(0.005, 1e-5, 0.015),
                slope: ParamBounds::new(10.0, 2.5, 50.0),
            },
            step: TermSettings {
                enabled: true,
                amplitude: ParamBounds::new(1e-4, 1e-6, 0.05),
                slope: ParamBounds::new(1.0, 0.5, 2.0),
            },
        }
    }
}

impl HypermetTerms {
    /// Pure Gaussian: every auxiliary term disabled.
    #[must_use]
    pub fn gaussian_only() -> Self {
        let mut terms = Self::default();
        terms.left_skew.enabled = false;
        terms.right_skew.enabled = false;
        terms.tail.enabled = false;
        terms.step.enabled = false;
        terms
    }
}

/// Which estimator supplies a peak's reported area and count rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AreaPolicy {
    /// Always the SUM4 net area.
    #[default]
    Sum4,
    /// The Hypermet area when its fit converged, SUM4 otherwise.
    HypermetWhenConverged,
}

/// Immutable configuration snapshot for finding and fitting.
///
/// Passed explicitly to every component; never global. Per-spectrum
/// values (`bits`, times, calibrations) are filled in by the fitter when
/// data is loaded.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FitSettings {
    /// ROI margin beyond finder edges, in FWHM at the right edge.
    pub roi_extend_peaks: f64,
    /// Candidates closer than this many margins merge into one ROI.
    pub roi_merge_threshold: f64,
    /// Moving-average window of the finder (channels, odd).
    pub smoothing_window: usize,
    /// Minimum finder significance in standard deviations.
    pub finder_sigma: f64,
    /// Longest outward edge scan, in FWHM.
    pub finder_max_excursion: f64,
    /// Peak FWHM in channels when no calibration is available.
    pub nominal_fwhm: f64,
    /// ROIs whose right edge lies below this energy are dropped.
    pub energy_cutoff: f64,
    /// Allowed center movement during a fit, in FWHM.
    pub lateral_slack: f64,
    /// Share one width parameter across a multiplet.
    pub width_common: bool,
    /// Bounds of the shared width, relative to the predicted width.
    pub width_common_bounds: (f64, f64),
    /// Bounds of independent widths, relative to the predicted width.
    pub width_variable_bounds: (f64, f64),
    /// Channels averaged in each background edge.
    pub background_edge_samples: usize,
    /// Degree of the ROI background polynomial.
    pub background_degree: usize,
    /// Half-width of the SUM4 window in FWHM.
    pub sum4_extent: f64,
    /// Skip the Hypermet fit entirely.
    pub sum4_only: bool,
    pub hypermet_terms: HypermetTerms,
    pub fitter_max_iterations: usize,
    /// Search fit residuals for missed peaks.
    pub residual_refine: bool,
    pub residual_max_iterations: usize,
    /// Smallest residual height worth a new peak (counts).
    pub residual_min_amplitude: f64,
    /// Residual candidates closer than this (FWHM) to a peak are ignored.
    pub residual_too_close: f64,
    pub area_policy: AreaPolicy,

    pub bits: u16,
    pub live_seconds: f64,
    pub real_seconds: f64,
    pub energy_calibration: Calibration,
    pub fwhm_calibration: Calibration,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            roi_extend_peaks: 1.5,
            roi_merge_threshold: 2.0,
            smoothing_window: 3,
            finder_sigma: 3.0,
            finder_max_excursion: 4.0,
            nominal_fwhm: 2.0,
            energy_cutoff: 0.0,
            lateral_slack: 0.5,
            width_common: false,
            width_common_bounds: (0.5, 2.0),
            width_variable_bounds: (0.5, 3.0),
            background_edge_samples: 3,
            background_degree: 1,
            sum4_extent: 1.5,
            sum4_only: false,
            hypermet_terms: HypermetTerms::default(),
            fitter_max_iterations: 200,
            residual_refine: false,
            residual_max_iterations: 3,
            residual_min_amplitude: 10.0,
            residual_too_close: 1.0,
            area_policy: AreaPolicy::Sum4,
            bits: 0,
            live_seconds: 0.0,
            real_seconds: 0.0,
            energy_calibration: Calibration::default(),
            fwhm_calibration: Calibration::default(),
        }
    }
}

impl FitSettings {
    /// Creates default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ROI extension margin.
    #[must_use]
    pub fn with_roi_extend_peaks(mut self, factor: f64) -> Self {
        self.roi_extend_peaks = factor;
        self
    }

    /// Sets the finder smoothing window.
    #[must_use]
    pub fn with_smoothing_window(mut self, window: usize) -> Self {
        self.smoothing_window = window;
        self
    }

    /// Sets the finder significance threshold.
    #[must_use]
    pub fn with_finder_sigma(mut self, sigma: f64) -> Self {
        self.finder_sigma = sigma;
        self
    }

    /// Sets the fallback FWHM in channels.
    #[must_use]
    pub fn with_nominal_fwhm(mut self, fwhm: f64) -> Self {
        self.nominal_fwhm = fwhm;
        self
    }

    /// Sets the energy cutoff.
    #[must_use]
    pub fn with_energy_cutoff(mut self, cutoff: f64) -> Self {
        self.energy_cutoff = cutoff;
        self
    }

    /// Selects the common-width policy.
    #[must_use]
    pub fn with_width_common(mut self, common: bool) -> Self {
        self.width_common = common;
        self
    }

    /// Sets the Hypermet term configuration.
    #[must_use]
    pub fn with_hypermet_terms(mut self, terms: HypermetTerms) -> Self {
        self.hypermet_terms = terms;
        self
    }

    /// Enables residual refinement.
    #[must_use]
    pub fn with_residual_refine(mut self, refine: bool) -> Self {
        self.residual_refine = refine;
        self
    }

    /// Skips Hypermet fitting.
    #[must_use]
    pub fn with_sum4_only(mut self, sum4_only: bool) -> Self {
        self.sum4_only = sum4_only;
        self
    }

    /// Sets the area policy.
    #[must_use]
    pub fn with_area_policy(mut self, policy: AreaPolicy) -> Self {
        self.area_policy = policy;
        self
    }

    /// Sets live and real time.
    #[must_use]
    pub fn with_times(mut self, live_seconds: f64, real_seconds: f64) -> Self {
        self.live_seconds = live_seconds;
        self.real_seconds = real_seconds;
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

    /// Theoretical FWHM in channels at `channel`.
    ///
    /// Uses the FWHM calibration through the energy calibration when both
    /// are valid, the FWHM calibration directly on channels when only it
    /// is valid, and `nominal_fwhm` otherwise.
    #[must_use]
    pub fn fwhm_at(&self, channel: f64) -> f64 {
        self.fwhm_calibration
            .fwhm_channels(&self.energy_calibration, channel)
            .unwrap_or(self.nominal_fwhm)
    }

    /// Count rate divisor, if live time is known.
    #[must_use]
    pub fn live_time(&self) -> Option<f64> {
        (self.live_seconds > 0.0).then_some(self.live_seconds)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidSetting {
                    name,
                    reason: format!("must be positive, got {value}"),
                })
            }
        };
        let ordered = |name: &'static str, (lo, hi): (f64, f64)| {
            if lo > 0.0 && lo < hi {
                Ok(())
            } else {
                Err(Error::InvalidSetting {
                    name,
                    reason: format!("bounds ({lo}, {hi}) must satisfy 0 < lo < hi"),
                })
            }
        };

        positive("finder_sigma", self.finder_sigma)?;
        positive("nominal_fwhm", self.nominal_fwhm)?;
        positive("roi_merge_threshold", self.roi_merge_threshold)?;
        positive("finder_max_excursion", self.finder_max_excursion)?;
        positive("sum4_extent", self.sum4_extent)?;
        positive("lateral_slack", self.lateral_slack)?;
        ordered("width_common_bounds", self.width_common_bounds)?;
        ordered("width_variable_bounds", self.width_variable_bounds)?;
        if !(self.roi_extend_peaks.is_finite() && self.roi_extend_peaks >= 0.0) {
            return Err(Error::InvalidSetting {
                name: "roi_extend_peaks",
                reason: "must be non-negative".to_string(),
            });
        }
        if self.smoothing_window == 0 || self.smoothing_window % 2 == 0 {
            return Err(Error::InvalidSetting {
                name: "smoothing_window",
                reason: format!("must be odd, got {}", self.smoothing_window),
            });
        }
        if self.background_edge_samples == 0 {
            return Err(Error::InvalidSetting {
                name: "background_edge_samples",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fitter_max_iterations == 0 {
            return Err(Error::InvalidSetting {
                name: "fitter_max_iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        let terms = &self.hypermet_terms;
        terms.left_skew.amplitude.check("left_skew.amplitude")?;
        terms.left_skew.slope.check("left_skew.slope")?;
        terms.right_skew.amplitude.check("right_skew.amplitude")?;
        terms.right_skew.slope.check("right_skew.slope")?;
        terms.tail.amplitude.check("tail.amplitude")?;
        terms.tail.slope.check("tail.slope")?;
        terms.step.amplitude.check("step.amplitude")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{CurveFunction, SqrtPoly};
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_validate() {
        assert!(FitSettings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_even_window() {
        let settings = FitSettings::new().with_smoothing_window(4);
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSetting {
                name: "smoothing_window",
                ..
            })
        ));
    }

    #[test]
    fn test_fwhm_falls_back_to_nominal() {
        let settings = FitSettings::new().with_nominal_fwhm(3.5);
        assert_relative_eq!(settings.fwhm_at(1000.0), 3.5);
    }

    #[test]
    fn test_fwhm_through_calibrations() {
        let energy = Calibration::linear(0.0, 0.5, 14).unwrap();
        // constant 2 keV FWHM = 4 channels at 0.5 keV/channel
        let fwhm =
            Calibration::new(CurveFunction::SqrtPoly(SqrtPoly::new(vec![4.0])), 14, "keV").unwrap();
        let settings = FitSettings::new()
            .with_energy_calibration(energy)
            .with_fwhm_calibration(fwhm);
        assert_relative_eq!(settings.fwhm_at(2000.0), 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_live_time() {
        assert!(FitSettings::new().live_time().is_none());
        assert_eq!(FitSettings::new().with_times(10.0, 12.0).live_time(), Some(10.0));
    }
}
