//! Scalar curve families used for calibrations and backgrounds.
//!
//! Every family implements [`Curve`]; [`CurveFunction`] wraps the concrete
//! families so calibrations can be cloned and serialized. Fitters only
//! ever talk to the trait.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]

use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Capability shared by all fit-model curves.
pub trait Curve {
    /// Family name, for reports.
    fn name(&self) -> &'static str;

    /// Evaluates the curve at `x`.
    fn evaluate(&self, x: f64) -> f64;

    /// Number of coefficients.
    fn coeff_count(&self) -> usize;

    /// Current coefficients.
    fn coeffs(&self) -> &[f64];

    /// Replaces the coefficients. Extra values are ignored, missing ones
    /// are left untouched.
    fn set_coeffs(&mut self, coeffs: &[f64]);

    /// First derivative at `x`, numeric unless a family knows better.
    fn derivative(&self, x: f64) -> f64 {
        let h = 1e-6 * x.abs().max(1.0);
        (self.evaluate(x + h) - self.evaluate(x - h)) / (2.0 * h)
    }

    /// Solves `evaluate(x) == y` for `x` within `[lo, hi]`.
    ///
    /// The curve must be monotonic on the interval; returns `None` when
    /// `y` is not bracketed.
    fn inverse(&self, y: f64, lo: f64, hi: f64) -> Option<f64> {
        let (mut a, mut b) = (lo, hi);
        let mut fa = self.evaluate(a) - y;
        let fb = self.evaluate(b) - y;
        if !fa.is_finite() || !fb.is_finite() || fa * fb > 0.0 {
            return None;
        }
        for _ in 0..200 {
            let mid = 0.5 * (a + b);
            let fm = self.evaluate(mid) - y;
            if fm == 0.0 || (b - a).abs() < 1e-10 * mid.abs().max(1.0) {
                return Some(mid);
            }
            if fa * fm < 0.0 {
                b = mid;
            } else {
                a = mid;
                fa = fm;
            }
        }
        Some(0.5 * (a + b))
    }
}

/// Polynomial in `(x - xoffset)`: `Σ cᵢ (x − x₀)ⁱ`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Polynomial {
    coeffs: Vec<f64>,
    xoffset: f64,
}

impl Polynomial {
    /// Creates a polynomial with the given coefficients, lowest order first.
    #[must_use]
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self {
            coeffs,
            xoffset: 0.0,
        }
    }

    /// Creates a polynomial evaluated relative to `xoffset`.
    #[must_use]
    pub fn with_offset(coeffs: Vec<f64>, xoffset: f64) -> Self {
        Self { coeffs, xoffset }
    }

    /// Straight line through `(x1, y1)` and `(x2, y2)`, anchored at `x1`.
    #[must_use]
    pub fn through(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let slope = if x2 == x1 { 0.0 } else { (y2 - y1) / (x2 - x1) };
        Self::with_offset(vec![y1, slope], x1)
    }

    /// Offset subtracted from `x` before evaluation.
    #[must_use]
    pub fn xoffset(&self) -> f64 {
        self.xoffset
    }

    /// Polynomial degree, or `None` when there are no coefficients.
    #[must_use]
    pub fn degree(&self) -> Option<usize> {
        self.coeffs.len().checked_sub(1)
    }

    /// Returns a copy with `len` coefficients, zero-padding or truncating.
    #[must_use]
    pub fn resized(&self, len: usize) -> Self {
        let mut coeffs = self.coeffs.clone();
        coeffs.resize(len, 0.0);
        Self::with_offset(coeffs, self.xoffset)
    }

    /// Weighted linear least-squares fit of the given degree.
    ///
    /// `weights` are inverse variances; `None` weights every point equally.
    /// Returns `None` when the system is underdetermined or singular.
    #[must_use]
    pub fn fit_linear(
        x: &[f64],
        y: &[f64],
        weights: Option<&[f64]>,
        degree: usize,
        xoffset: f64,
    ) -> Option<Self> {
        let n = x.len().min(y.len());
        let terms = degree + 1;
        if n < terms {
            return None;
        }
        let design = DMatrix::from_fn(n, terms, |row, col| (x[row] - xoffset).powi(col as i32));
        let w = DVector::from_fn(n, |row, _| {
            weights.and_then(|w| w.get(row)).copied().unwrap_or(1.0)
        });
        let mut normal = DMatrix::<f64>::zeros(terms, terms);
        let mut rhs = DVector::<f64>::zeros(terms);
        for row in 0..n {
            for i in 0..terms {
                rhs[i] += w[row] * design[(row, i)] * y[row];
                for j in 0..terms {
                    normal[(i, j)] += w[row] * design[(row, i)] * design[(row, j)];
                }
            }
        }
        let solution = normal.lu().solve(&rhs)?;
        if solution.iter().any(|c| !c.is_finite()) {
            return None;
        }
        Some(Self::with_offset(solution.iter().copied().collect(), xoffset))
    }
}

impl Curve for Polynomial {
    fn name(&self) -> &'static str {
        "Polynomial"
    }

    fn evaluate(&self, x: f64) -> f64 {
        let t = x - self.xoffset;
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * t + c)
    }

    fn coeff_count(&self) -> usize {
        self.coeffs.len()
    }

    fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    fn set_coeffs(&mut self, coeffs: &[f64]) {
        for (dst, src) in self.coeffs.iter_mut().zip(coeffs) {
            *dst = *src;
        }
    }

    fn derivative(&self, x: f64) -> f64 {
        let t = x - self.xoffset;
        self.coeffs
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (i, &c)| acc * t + c * i as f64)
    }
}

/// `exp(Σ cᵢ lnⁱ x)`, a common efficiency parametrization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolyLog {
    coeffs: Vec<f64>,
}

impl PolyLog {
    #[must_use]
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self { coeffs }
    }
}

impl Curve for PolyLog {
    fn name(&self) -> &'static str {
        "PolyLog"
    }

    fn evaluate(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return f64::NAN;
        }
        let t = x.ln();
        self.coeffs
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * t + c)
            .exp()
    }

    fn coeff_count(&self) -> usize {
        self.coeffs.len()
    }

    fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    fn set_coeffs(&mut self, coeffs: &[f64]) {
        for (dst, src) in self.coeffs.iter_mut().zip(coeffs) {
            *dst = *src;
        }
    }
}

/// `exp(Σ cᵢ x⁻ⁱ)`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogInverse {
    coeffs: Vec<f64>,
}

impl LogInverse {
    #[must_use]
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self { coeffs }
    }
}

impl Curve for LogInverse {
    fn name(&self) -> &'static str {
        "LogInverse"
    }

    fn evaluate(&self, x: f64) -> f64 {
        if x == 0.0 {
            return f64::NAN;
        }
        let t = x.recip();
        self.coeffs
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * t + c)
            .exp()
    }

    fn coeff_count(&self) -> usize {
        self.coeffs.len()
    }

    fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    fn set_coeffs(&mut self, coeffs: &[f64]) {
        for (dst, src) in self.coeffs.iter_mut().zip(coeffs) {
            *dst = *src;
        }
    }
}

/// `√(Σ cᵢ xⁱ)`, the usual FWHM-versus-energy model.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SqrtPoly {
    coeffs: Vec<f64>,
}

impl SqrtPoly {
    #[must_use]
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self { coeffs }
    }
}

impl Curve for SqrtPoly {
    fn name(&self) -> &'static str {
        "SqrtPoly"
    }

    fn evaluate(&self, x: f64) -> f64 {
        let sum = self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c);
        sum.max(0.0).sqrt()
    }

    fn coeff_count(&self) -> usize {
        self.coeffs.len()
    }

    fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    fn set_coeffs(&mut self, coeffs: &[f64]) {
        for (dst, src) in self.coeffs.iter_mut().zip(coeffs) {
            *dst = *src;
        }
    }
}

/// Two-branch efficiency curve:
/// `ln ε = ((A + Bx + Cx²)^−G + (D + Ey + Fy²)^−G)^(−1/G)` with
/// `x = ln(E/100)` and `y = ln(E/1000)`.
///
/// Coefficients are `[A, B, C, D, E, F, G]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Effit {
    coeffs: Vec<f64>,
}

impl Default for Effit {
    fn default() -> Self {
        Self {
            coeffs: vec![0.0; Self::COEFFS],
        }
    }
}

impl Effit {
    /// Number of coefficients.
    pub const COEFFS: usize = 7;
    const LOW_ANCHOR: f64 = 100.0;
    const HIGH_ANCHOR: f64 = 1000.0;

    #[must_use]
    pub fn new(mut coeffs: Vec<f64>) -> Self {
        coeffs.resize(Self::COEFFS, 0.0);
        Self { coeffs }
    }
}

impl Curve for Effit {
    fn name(&self) -> &'static str {
        "Effit"
    }

    fn evaluate(&self, energy: f64) -> f64 {
        if energy <= 0.0 {
            return f64::NAN;
        }
        // missing coefficients read as zero
        let c: [f64; Self::COEFFS] =
            std::array::from_fn(|i| self.coeffs.get(i).copied().unwrap_or(0.0));
        let x = (energy / Self::LOW_ANCHOR).ln();
        let y = (energy / Self::HIGH_ANCHOR).ln();
        let low = c[0] + c[1] * x + c[2] * x * x;
        let high = c[3] + c[4] * y + c[5] * y * y;
        let g = c[6];

        let log_eff = if g == 0.0 || (low <= 0.0 && high <= 0.0) {
            low.max(high)
        } else if low <= 0.0 {
            high
        } else if high <= 0.0 {
            low
        } else {
            (low.powf(-g) + high.powf(-g)).powf(-1.0 / g)
        };
        log_eff.exp()
    }

    fn coeff_count(&self) -> usize {
        Self::COEFFS
    }

    fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    fn set_coeffs(&mut self, coeffs: &[f64]) {
        for (dst, src) in self.coeffs.iter_mut().zip(coeffs) {
            *dst = *src;
        }
    }
}

/// Closed set of curve families, dispatching to [`Curve`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CurveFunction {
    Polynomial(Polynomial),
    PolyLog(PolyLog),
    LogInverse(LogInverse),
    SqrtPoly(SqrtPoly),
    Effit(Effit),
}

impl Default for CurveFunction {
    fn default() -> Self {
        Self::Polynomial(Polynomial::default())
    }
}

impl CurveFunction {
    fn inner(&self) -> &dyn Curve {
        match self {
            Self::Polynomial(c) => c,
            Self::PolyLog(c) => c,
            Self::LogInverse(c) => c,
            Self::SqrtPoly(c) => c,
            Self::Effit(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Curve {
        match self {
            Self::Polynomial(c) => c,
            Self::PolyLog(c) => c,
            Self::LogInverse(c) => c,
            Self::SqrtPoly(c) => c,
            Self::Effit(c) => c,
        }
    }
}

impl Curve for CurveFunction {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn evaluate(&self, x: f64) -> f64 {
        self.inner().evaluate(x)
    }

    fn coeff_count(&self) -> usize {
        self.inner().coeff_count()
    }

    fn coeffs(&self) -> &[f64] {
        self.inner().coeffs()
    }

    fn set_coeffs(&mut self, coeffs: &[f64]) {
        self.inner_mut().set_coeffs(coeffs);
    }

    fn derivative(&self, x: f64) -> f64 {
        self.inner().derivative(x)
    }
}
