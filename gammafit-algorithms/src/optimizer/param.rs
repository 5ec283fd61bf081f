//! Bounded, fixable fit parameters.

use gammafit_core::{ParamBounds, UncertainValue};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Keeps bounded parameters off the exact bound, where the sine transform
/// has zero slope.
const BOUND_MARGIN: f64 = 1e-9;

/// One model parameter as seen by an optimizer.
///
/// A disabled parameter contributes nothing to the model; a fixed one
/// keeps its value. Both are excluded from the free parameter vector.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitParam {
    pub value: f64,
    pub uncertainty: f64,
    pub lower: f64,
    pub upper: f64,
    pub enabled: bool,
    pub fixed: bool,
}

impl Default for FitParam {
    fn default() -> Self {
        Self::free(0.0)
    }
}

impl FitParam {
    /// Unbounded free parameter.
    #[must_use]
    pub fn free(value: f64) -> Self {
        Self {
            value,
            uncertainty: f64::NAN,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            enabled: true,
            fixed: false,
        }
    }

    /// Free parameter confined to `[lower, upper]`; the value is clamped.
    #[must_use]
    pub fn bounded(value: f64, lower: f64, upper: f64) -> Self {
        let (lower, upper) = if lower <= upper {
            (lower, upper)
        } else {
            (upper, lower)
        };
        Self {
            value: value.clamp(lower, upper),
            lower,
            upper,
            ..Self::free(value)
        }
    }

    /// Parameter with a lower bound only.
    #[must_use]
    pub fn at_least(value: f64, lower: f64) -> Self {
        Self {
            value: value.max(lower),
            lower,
            ..Self::free(value)
        }
    }

    /// Builds a parameter from configured bounds, fixed when they say so.
    #[must_use]
    pub fn from_bounds(bounds: ParamBounds, enabled: bool) -> Self {
        Self {
            enabled,
            fixed: bounds.fixed,
            ..Self::bounded(bounds.initial, bounds.lower, bounds.upper)
        }
    }

    /// A parameter that takes no part in the model.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::free(0.0)
        }
    }

    /// Returns a copy with the value fixed.
    #[must_use]
    pub fn fixed(self) -> Self {
        Self {
            fixed: true,
            ..self
        }
    }

    /// Whether an optimizer may vary this parameter.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.enabled && !self.fixed
    }

    /// Value and uncertainty.
    #[must_use]
    pub fn to_uncertain(&self) -> UncertainValue {
        UncertainValue::new(self.value, self.uncertainty)
    }

    /// Maps the value into the unconstrained space the optimizers search.
    #[must_use]
    pub fn to_internal(&self) -> f64 {
        let (lo, hi) = (self.lower, self.upper);
        match (lo.is_finite(), hi.is_finite()) {
            (true, true) => {
                let ratio = 2.0 * (self.value - lo) / (hi - lo) - 1.0;
                ratio.clamp(-1.0 + BOUND_MARGIN, 1.0 - BOUND_MARGIN).asin()
            }
            (true, false) => {
                let shifted = (self.value - lo + 1.0).max(1.0 + BOUND_MARGIN);
                (shifted * shifted - 1.0).sqrt()
            }
            (false, true) => {
                let shifted = (hi - self.value + 1.0).max(1.0 + BOUND_MARGIN);
                (shifted * shifted - 1.0).sqrt()
            }
            (false, false) => self.value,
        }
    }

    /// Inverse of [`FitParam::to_internal`].
    #[must_use]
    pub fn from_internal(&self, internal: f64) -> f64 {
        let (lo, hi) = (self.lower, self.upper);
        match (lo.is_finite(), hi.is_finite()) {
            (true, true) => lo + 0.5 * (hi - lo) * (internal.sin() + 1.0),
            (true, false) => lo - 1.0 + (internal * internal + 1.0).sqrt(),
            (false, true) => hi + 1.0 - (internal * internal + 1.0).sqrt(),
            (false, false) => internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_internal_round_trip() {
        for param in [
            FitParam::bounded(3.0, 1.0, 5.0),
            FitParam::at_least(7.0, 2.0),
            FitParam::free(-4.0),
            FitParam {
                upper: 10.0,
                ..FitParam::free(6.0)
            },
        ] {
            let back = param.from_internal(param.to_internal());
            assert_relative_eq!(back, param.value, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_transform_respects_bounds() {
        let param = FitParam::bounded(2.0, 1.0, 3.0);
        for t in [-100.0, -1.0, 0.0, 2.5, 1e6] {
            let value = param.from_internal(t);
            assert!((1.0..=3.0).contains(&value));
        }
        let lower = FitParam::at_least(0.0, 0.0);
        assert!(lower.from_internal(-50.0) >= 0.0);
    }

    #[test]
    fn test_from_bounds_carries_fixed() {
        let free = FitParam::from_bounds(ParamBounds::new(0.5, 0.2, 2.0), true);
        assert!(free.is_free());
        let held = FitParam::from_bounds(ParamBounds::new(0.5, 0.2, 2.0).fixed(), true);
        assert!(held.fixed);
        assert!(!held.is_free());
        assert_relative_eq!(held.value, 0.5);
    }

    #[test]
    fn test_free_flags() {
        assert!(FitParam::free(1.0).is_free());
        assert!(!FitParam::free(1.0).fixed().is_free());
        assert!(!FitParam::disabled().is_free());
        let clamped = FitParam::bounded(10.0, 0.0, 1.0);
        assert_relative_eq!(clamped.value, 1.0);
    }
}
