//! Hypermet peak shape.
//!
//! A Gaussian core with optional left skew, right skew, symmetric tail
//! and step terms:
//!
//! ```text
//! f(x) = h · [ exp(−s²) + ½ (Lskew + Rskew + tail + step) ],   s = (x − c) / w
//! Lskew = A_L · exp( s/β_L) · erfc( s + 1/(2β_L))
//! Rskew = A_R · exp(−s/β_R) · erfc(−s + 1/(2β_R))
//! tail  = A_T · ½ [exp(s/β_T) erfc(s + 1/(2β_T)) + exp(−s/β_T) erfc(−s + 1/(2β_T))]
//! step  = A_S · erfc(s)
//! ```
//!
//! `w` is the Gaussian width in the `exp(−s²)` convention, so
//! `FWHM = 2 w √ln2`.

use gammafit_core::{FitSettings, HypermetTerms, UncertainValue};
use statrs::function::erf::erfc;

use crate::optimizer::FitParam;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// `erfc` arguments beyond this underflow; the term is zero there.
const ERFC_CUTOFF: f64 = 26.0;

/// Number of parameters per peak, in [`Hypermet::params`] order.
pub const HYPERMET_PARAMS: usize = 10;

/// Index of the width parameter in [`Hypermet::params`] order.
pub const WIDTH_INDEX: usize = 2;

/// Converts a Hypermet width into FWHM.
#[must_use]
pub fn width_to_fwhm(width: f64) -> f64 {
    2.0 * width * std::f64::consts::LN_2.sqrt()
}

/// Converts an FWHM into a Hypermet width.
#[must_use]
pub fn fwhm_to_width(fwhm: f64) -> f64 {
    fwhm / (2.0 * std::f64::consts::LN_2.sqrt())
}

/// `exp(±s/β) · erfc(±s + 1/(2β))` with the sign chosen by `side`.
fn skew(spread: f64, slope: f64, side: f64) -> f64 {
    if slope <= 0.0 {
        return 0.0;
    }
    let s = side * spread;
    let arg = s + 0.5 / slope;
    if arg > ERFC_CUTOFF {
        return 0.0;
    }
    (s / slope).exp() * erfc(arg)
}

/// Closed-form integral of a skew term over `s`: `2β exp(−1/(4β²))`.
fn skew_integral(slope: f64) -> f64 {
    if slope <= 0.0 {
        return 0.0;
    }
    2.0 * slope * (-0.25 / (slope * slope)).exp()
}

/// Parametric peak shape fitted by nonlinear least squares.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hypermet {
    pub center: FitParam,
    pub height: FitParam,
    pub width: FitParam,
    pub left_skew_amplitude: FitParam,
    pub left_skew_slope: FitParam,
    pub right_skew_amplitude: FitParam,
    pub right_skew_slope: FitParam,
    pub tail_amplitude: FitParam,
    pub tail_slope: FitParam,
    pub step_amplitude: FitParam,
    /// Reduced χ² of the fit that produced these parameters.
    pub chi_squared: f64,
}

impl Default for Hypermet {
    fn default() -> Self {
        Self {
            center: FitParam::free(0.0),
            height: FitParam::at_least(0.0, 0.0),
            width: FitParam::at_least(1.0, 0.0),
            left_skew_amplitude: FitParam::disabled(),
            left_skew_slope: FitParam::disabled(),
            right_skew_amplitude: FitParam::disabled(),
            right_skew_slope: FitParam::disabled(),
            tail_amplitude: FitParam::disabled(),
            tail_slope: FitParam::disabled(),
            step_amplitude: FitParam::disabled(),
            chi_squared: f64::NAN,
        }
    }
}

impl Hypermet {
    /// Pure Gaussian with unbounded center.
    #[must_use]
    pub fn gaussian(center: f64, height: f64, width: f64) -> Self {
        Self {
            center: FitParam::free(center),
            height: FitParam::at_least(height, 0.0),
            width: FitParam::at_least(width, 0.0),
            ..Self::default()
        }
    }

    /// Initial guess for a fit, bounded according to `settings`.
    ///
    /// `width` is the predicted width; the center may move by
    /// `lateral_slack` FWHM and the width stays within
    /// `width_variable_bounds` of the prediction.
    #[must_use]
    pub fn guess(center: f64, height: f64, width: f64, settings: &FitSettings) -> Self {
        let slack = settings.lateral_slack * width_to_fwhm(width);
        let (wlo, whi) = settings.width_variable_bounds;
        let mut hyp = Self {
            center: FitParam::bounded(center, center - slack, center + slack),
            height: FitParam::at_least(height.max(f64::MIN_POSITIVE), 0.0),
            width: FitParam::bounded(width, width * wlo, width * whi),
            ..Self::default()
        };
        hyp.apply_terms(&settings.hypermet_terms);
        hyp
    }

    /// Resets the auxiliary terms to their configured initial state.
    pub fn apply_terms(&mut self, terms: &HypermetTerms) {
        self.left_skew_amplitude = FitParam::from_bounds(terms.left_skew.amplitude, terms.left_skew.enabled);
        self.left_skew_slope = FitParam::from_bounds(terms.left_skew.slope, terms.left_skew.enabled);
        self.right_skew_amplitude =
            FitParam::from_bounds(terms.right_skew.amplitude, terms.right_skew.enabled);
        self.right_skew_slope = FitParam::from_bounds(terms.right_skew.slope, terms.right_skew.enabled);
        self.tail_amplitude = FitParam::from_bounds(terms.tail.amplitude, terms.tail.enabled);
        self.tail_slope = FitParam::from_bounds(terms.tail.slope, terms.tail.enabled);
        self.step_amplitude = FitParam::from_bounds(terms.step.amplitude, terms.step.enabled);
    }

    /// All parameters in fixed order.
    #[must_use]
    pub fn params(&self) -> [&FitParam; HYPERMET_PARAMS] {
        [
            &self.center,
            &self.height,
            &self.width,
            &self.left_skew_amplitude,
            &self.left_skew_slope,
            &self.right_skew_amplitude,
            &self.right_skew_slope,
            &self.tail_amplitude,
            &self.tail_slope,
            &self.step_amplitude,
        ]
    }

    /// Mutable parameters in [`Hypermet::params`] order.
    pub fn params_mut(&mut self) -> [&mut FitParam; HYPERMET_PARAMS] {
        [
            &mut self.center,
            &mut self.height,
            &mut self.width,
            &mut self.left_skew_amplitude,
            &mut self.left_skew_slope,
            &mut self.right_skew_amplitude,
            &mut self.right_skew_slope,
            &mut self.tail_amplitude,
            &mut self.tail_slope,
            &mut self.step_amplitude,
        ]
    }

    fn spread(&self, x: f64) -> f64 {
        (x - self.center.value) / self.width.value
    }

    /// Peak component without the step.
    #[must_use]
    pub fn eval_peak(&self, x: f64) -> f64 {
        if self.width.value <= 0.0 {
            return 0.0;
        }
        let s = self.spread(x);
        let gaussian = (-s * s).exp();
        let mut extra = 0.0;
        if self.left_skew_amplitude.enabled {
            extra += self.left_skew_amplitude.value * skew(s, self.left_skew_slope.value, 1.0);
        }
        if self.right_skew_amplitude.enabled {
            extra += self.right_skew_amplitude.value * skew(s, self.right_skew_slope.value, -1.0);
        }
        if self.tail_amplitude.enabled {
            let slope = self.tail_slope.value;
            extra += self.tail_amplitude.value * 0.5 * (skew(s, slope, 1.0) + skew(s, slope, -1.0));
        }
        self.height.value * (gaussian + 0.5 * extra)
    }

    /// Step component alone.
    #[must_use]
    pub fn eval_step(&self, x: f64) -> f64 {
        if !self.step_amplitude.enabled || self.width.value <= 0.0 {
            return 0.0;
        }
        self.height.value * 0.5 * self.step_amplitude.value * erfc(self.spread(x))
    }

    /// Full shape at `x`.
    #[must_use]
    pub fn evaluate(&self, x: f64) -> f64 {
        self.eval_peak(x) + self.eval_step(x)
    }

    /// Whether the fit produced a usable peak.
    #[must_use]
    pub fn height_finite_positive(&self) -> bool {
        self.height.value.is_finite() && self.height.value > 0.0
    }

    /// Marks the shape as not converged.
    pub fn invalidate(&mut self) {
        self.height.value = 0.0;
        self.height.uncertainty = f64::NAN;
        self.chi_squared = f64::NAN;
    }

    /// Peak area from the closed-form integral of the peak terms.
    ///
    /// The step is excluded; it does not integrate to a finite value.
    #[must_use]
    pub fn area(&self) -> UncertainValue {
        let h = self.height.value;
        let w = self.width.value;
        let mut shape = std::f64::consts::PI.sqrt();
        // each skew contributes ½·A·2β·exp(−1/(4β²)) = A·β·exp(−1/(4β²))
        if self.left_skew_amplitude.enabled {
            shape += 0.5 * self.left_skew_amplitude.value * skew_integral(self.left_skew_slope.value);
        }
        if self.right_skew_amplitude.enabled {
            shape +=
                0.5 * self.right_skew_amplitude.value * skew_integral(self.right_skew_slope.value);
        }
        if self.tail_amplitude.enabled {
            shape += 0.5 * self.tail_amplitude.value * skew_integral(self.tail_slope.value);
        }
        let area = h * w * shape;
        let relative = (self.height.uncertainty / h).hypot(self.width.uncertainty / w);
        UncertainValue::new(area, area.abs() * relative)
    }

    /// FWHM in channels, from the width.
    #[must_use]
    pub fn fwhm_channels(&self) -> UncertainValue {
        UncertainValue::new(
            width_to_fwhm(self.width.value),
            width_to_fwhm(self.width.uncertainty),
        )
    }

    /// Center position with uncertainty.
    #[must_use]
    pub fn position(&self) -> UncertainValue {
        self.center.to_uncertain()
    }
}
