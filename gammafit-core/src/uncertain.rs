//! Values carrying a one-sigma uncertainty.
//!
//! Every measured quantity in the engine (areas, centroids, widths,
//! energies) is an [`UncertainValue`]. Values are immutable; arithmetic
//! returns new values with first-order error propagation.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default number of significant figures kept for display.
pub const DEFAULT_SIGFIGS: u16 = 2;

/// A value with its one-sigma uncertainty.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UncertainValue {
    value: f64,
    uncertainty: f64,
    sigfigs: u16,
}

impl Default for UncertainValue {
    fn default() -> Self {
        Self {
            value: 0.0,
            uncertainty: f64::NAN,
            sigfigs: DEFAULT_SIGFIGS,
        }
    }
}

impl UncertainValue {
    /// Creates a value with the default display precision.
    #[must_use]
    pub fn new(value: f64, uncertainty: f64) -> Self {
        Self {
            value,
            uncertainty: uncertainty.abs(),
            sigfigs: DEFAULT_SIGFIGS,
        }
    }

    /// Creates a value with an explicit number of significant figures.
    #[must_use]
    pub fn with_sigfigs(value: f64, uncertainty: f64, sigfigs: u16) -> Self {
        Self {
            value,
            uncertainty: uncertainty.abs(),
            sigfigs: sigfigs.max(1),
        }
    }

    /// A Poisson-distributed count: uncertainty is the square root.
    #[must_use]
    pub fn from_counts(counts: f64) -> Self {
        Self::new(counts, counts.max(0.0).sqrt())
    }

    /// An exactly known value.
    #[must_use]
    pub fn exact(value: f64) -> Self {
        Self::new(value, 0.0)
    }

    /// Central value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// One-sigma uncertainty (always non-negative or NaN).
    #[inline]
    #[must_use]
    pub fn uncertainty(&self) -> f64 {
        self.uncertainty
    }

    /// Significant figures used when formatting.
    #[inline]
    #[must_use]
    pub fn sigfigs(&self) -> u16 {
        self.sigfigs
    }

    /// Variance, the squared uncertainty.
    #[must_use]
    pub fn variance(&self) -> f64 {
        self.uncertainty * self.uncertainty
    }

    /// Relative uncertainty in percent; NaN when the value is zero.
    #[must_use]
    pub fn error_percent(&self) -> f64 {
        if self.value == 0.0 {
            return f64::NAN;
        }
        (self.uncertainty / self.value).abs() * 100.0
    }

    /// True when both value and uncertainty are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.uncertainty.is_finite()
    }

    /// Returns a copy with the uncertainty replaced.
    #[must_use]
    pub fn with_uncertainty(self, uncertainty: f64) -> Self {
        Self {
            uncertainty: uncertainty.abs(),
            ..self
        }
    }

    /// Decimal places implied by the uncertainty and sigfigs.
    fn decimals(&self) -> usize {
        let reference = if self.uncertainty.is_finite() && self.uncertainty > 0.0 {
            self.uncertainty
        } else if self.value != 0.0 && self.value.is_finite() {
            self.value.abs()
        } else {
            return usize::from(self.sigfigs.saturating_sub(1));
        };
        let magnitude = reference.log10().floor() as i64;
        let decimals = i64::from(self.sigfigs) - 1 - magnitude;
        usize::try_from(decimals.max(0)).unwrap_or(0)
    }
}

impl fmt::Display for UncertainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decimals = self.decimals();
        if self.uncertainty.is_finite() {
            write!(
                f,
                "{:.*} ± {:.*}",
                decimals, self.value, decimals, self.uncertainty
            )
        } else {
            write!(f, "{:.*} ± ?", decimals, self.value)
        }
    }
}

impl Add for UncertainValue {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::with_sigfigs(
            self.value + rhs.value,
            self.uncertainty.hypot(rhs.uncertainty),
            self.sigfigs.min(rhs.sigfigs),
        )
    }
}

impl Sub for UncertainValue {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::with_sigfigs(
            self.value - rhs.value,
            self.uncertainty.hypot(rhs.uncertainty),
            self.sigfigs.min(rhs.sigfigs),
        )
    }
}

impl Mul for UncertainValue {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        // (b·σa)² + (a·σb)² is the relative quadrature rule without dividing by zero
        let uncertainty = (rhs.value * self.uncertainty).hypot(self.value * rhs.uncertainty);
        Self::with_sigfigs(
            self.value * rhs.value,
            uncertainty,
            self.sigfigs.min(rhs.sigfigs),
        )
    }
}

impl Div for UncertainValue {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let value = self.value / rhs.value;
        let uncertainty =
            (self.uncertainty / rhs.value).hypot(value * rhs.uncertainty / rhs.value);
        Self::with_sigfigs(value, uncertainty, self.sigfigs.min(rhs.sigfigs))
    }
}

impl Mul<f64> for UncertainValue {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::with_sigfigs(self.value * rhs, self.uncertainty * rhs.abs(), self.sigfigs)
    }
}

impl Div<f64> for UncertainValue {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self::with_sigfigs(self.value / rhs, self.uncertainty / rhs.abs(), self.sigfigs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_add_then_subtract_restores_value() {
        let a = UncertainValue::new(12.5, 0.3);
        let b = UncertainValue::new(-4.25, 1.1);
        let round_trip = (a + b) - b;
        assert_relative_eq!(round_trip.value(), a.value(), epsilon = 1e-12);
    }

    #[test]
    fn test_sum_uncertainty_is_quadrature() {
        let a = UncertainValue::new(3.0, 0.3);
        let b = UncertainValue::new(4.0, 0.4);
        let sum = a + b;
        assert_relative_eq!(sum.uncertainty(), 0.5, epsilon = 1e-12);
        assert_relative_eq!((a - b).uncertainty(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_product_relative_uncertainty() {
        let a = UncertainValue::new(10.0, 1.0);
        let b = UncertainValue::new(20.0, 2.0);
        let product = a * b;
        assert_relative_eq!(product.value(), 200.0);
        // 10% ⊕ 10%
        assert_relative_eq!(product.uncertainty(), 200.0 * 0.02_f64.sqrt(), epsilon = 1e-9);

        let quotient = b / a;
        assert_relative_eq!(quotient.value(), 2.0);
        assert_relative_eq!(quotient.uncertainty(), 2.0 * 0.02_f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_counts_and_percent() {
        let counts = UncertainValue::from_counts(400.0);
        assert_relative_eq!(counts.uncertainty(), 20.0);
        assert_relative_eq!(counts.error_percent(), 5.0);
        assert!(UncertainValue::exact(0.0).error_percent().is_nan());
        assert!(!UncertainValue::default().is_finite());
    }

    #[test]
    fn test_display_rounds_to_uncertainty() {
        let value = UncertainValue::new(661.6574, 0.0123);
        assert_eq!(value.to_string(), "661.657 ± 0.012");
        let unknown = UncertainValue::new(5.0, f64::NAN);
        assert_eq!(unknown.to_string(), "5.0 ± ?");
    }
}
