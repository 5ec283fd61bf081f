//! Nonlinear least-squares fitting behind a swappable backend.
//!
//! A backend only has to implement [`Optimizer::minimize`] over an
//! unconstrained parameter vector. The two operations the engine needs,
//! fitting a set of Hypermet peaks over a shared background and fitting a
//! calibration curve, are provided on top of it and handle bounds,
//! uncertainties and snapshot-then-commit.
#![allow(clippy::cast_precision_loss)]

mod lm;
mod param;
mod simplex;

use std::cell::RefCell;
use std::fmt;

use gammafit_core::{Curve, FitSettings, Polynomial};
use log::warn;
use nalgebra::DMatrix;

use crate::hypermet::{Hypermet, WIDTH_INDEX};

pub use lm::LevenbergMarquardt;
pub use param::FitParam;
pub use simplex::NelderMead;

/// Iteration cap for calibration curve fits.
const CURVE_MAX_ITERATIONS: usize = 500;

/// A weighted least-squares objective.
pub trait LeastSquares {
    /// Number of residuals.
    fn residual_count(&self) -> usize;

    /// Weighted residuals `(yᵢ − f(xᵢ)) / σᵢ` at `params`.
    fn residuals(&self, params: &[f64]) -> Vec<f64>;
}

/// Sum of squared residuals.
#[must_use]
pub fn chi_squared(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// Central-difference Jacobian of the residuals.
#[must_use]
pub fn jacobian(problem: &dyn LeastSquares, params: &[f64]) -> DMatrix<f64> {
    let rows = problem.residual_count();
    let mut jac = DMatrix::zeros(rows, params.len());
    let mut shifted = params.to_vec();
    for (col, &p) in params.iter().enumerate() {
        let h = 1e-7 * p.abs().max(1.0);
        shifted[col] = p + h;
        let forward = problem.residuals(&shifted);
        shifted[col] = p - h;
        let backward = problem.residuals(&shifted);
        shifted[col] = p;
        for (row, (f, b)) in forward.iter().zip(&backward).enumerate() {
            jac[(row, col)] = (f - b) / (2.0 * h);
        }
    }
    jac
}

/// Result of a backend minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub params: Vec<f64>,
    /// Unreduced χ² at `params`.
    pub chi_squared: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Outcome of a committed or rejected fit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FitReport {
    /// Whether the backend met its convergence criterion.
    pub converged: bool,
    /// Whether parameters were written back.
    pub committed: bool,
    /// Reduced χ².
    pub chi_squared: f64,
    pub degrees_of_freedom: usize,
    pub iterations: usize,
    /// One-sigma uncertainties of the free parameters, in fit order.
    pub uncertainties: Vec<f64>,
}

impl FitReport {
    fn rejected() -> Self {
        Self {
            chi_squared: f64::NAN,
            ..Self::default()
        }
    }
}

/// How peak widths are parameterized in a multiplet fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WidthPolicy {
    /// Each peak has its own width, bounded around its prediction.
    #[default]
    Independent,
    /// One width shared by every peak in the region.
    Common,
}

impl WidthPolicy {
    #[must_use]
    pub fn from_settings(settings: &FitSettings) -> Self {
        if settings.width_common {
            Self::Common
        } else {
            Self::Independent
        }
    }
}

/// A nonlinear least-squares backend.
pub trait Optimizer: Send + Sync + fmt::Debug {
    /// Backend name, for logs and reports.
    fn name(&self) -> &'static str;

    /// Minimizes χ² of `problem` starting from `start`.
    fn minimize(&self, problem: &dyn LeastSquares, start: &[f64], max_iterations: usize)
        -> Minimum;

    /// Fits `peaks` plus `background` to `(x, y)` with Poisson weights.
    ///
    /// On convergence every free parameter, its uncertainty and the peaks'
    /// `chi_squared` are updated. When the backend stops without
    /// converging, or produces non-finite values, the background is left
    /// untouched and every peak is invalidated.
    fn fit_peaks(
        &self,
        x: &[f64],
        y: &[f64],
        peaks: &mut [Hypermet],
        background: &mut Polynomial,
        policy: WidthPolicy,
        settings: &FitSettings,
    ) -> FitReport {
        let problem = PeakProblem::new(x, y, peaks, background, policy, settings);
        let start = problem.start();
        match solve(self, &problem, &start, settings.fitter_max_iterations) {
            Some((minimum, mut report)) if report.converged => {
                report.uncertainties =
                    problem.commit(&minimum.params, &report.uncertainties, peaks, background);
                for peak in peaks.iter_mut() {
                    peak.chi_squared = report.chi_squared;
                }
                report
            }
            Some((_, report)) => {
                warn!(
                    "{}: peak fit stopped after {} iterations without converging",
                    self.name(),
                    report.iterations
                );
                peaks.iter_mut().for_each(Hypermet::invalidate);
                FitReport {
                    committed: false,
                    uncertainties: Vec::new(),
                    ..report
                }
            }
            None => {
                warn!("{}: peak fit produced no finite result", self.name());
                peaks.iter_mut().for_each(Hypermet::invalidate);
                FitReport::rejected()
            }
        }
    }

    /// Fits the coefficients of `curve` to `(x, y)`.
    ///
    /// Weights use the effective variance `σy² + (f′(x)·σx)²`. Empty
    /// `sigma_x` means exact abscissae; empty `sigma_y` means unit
    /// weights. On failure the coefficients are restored.
    fn fit_curve(
        &self,
        curve: &mut dyn Curve,
        x: &[f64],
        y: &[f64],
        sigma_x: &[f64],
        sigma_y: &[f64],
    ) -> FitReport {
        let snapshot = curve.coeffs().to_vec();
        let problem = CurveProblem {
            curve: RefCell::new(curve),
            x,
            y,
            sigma_x,
            sigma_y,
        };
        let outcome = solve(self, &problem, &snapshot, CURVE_MAX_ITERATIONS);
        let curve = problem.curve.into_inner();
        if let Some((minimum, report)) = outcome {
            curve.set_coeffs(&minimum.params);
            report
        } else {
            warn!("{}: {} fit produced no finite result", self.name(), curve.name());
            curve.set_coeffs(&snapshot);
            FitReport::rejected()
        }
    }
}

/// Runs the backend and derives χ² statistics and internal-space
/// uncertainties. `None` when the result is unusable.
fn solve<O: Optimizer + ?Sized>(
    optimizer: &O,
    problem: &dyn LeastSquares,
    start: &[f64],
    max_iterations: usize,
) -> Option<(Minimum, FitReport)> {
    let points = problem.residual_count();
    if start.is_empty() || points < start.len() {
        return None;
    }
    let minimum = optimizer.minimize(problem, start, max_iterations);
    if !minimum.chi_squared.is_finite() || !minimum.params.iter().all(|p| p.is_finite()) {
        return None;
    }
    let dof = points - start.len();
    let (reduced, scale) = if dof > 0 {
        let reduced = minimum.chi_squared / dof as f64;
        (reduced, reduced)
    } else {
        (minimum.chi_squared, 1.0)
    };
    let uncertainties = internal_uncertainties(problem, &minimum.params, scale);
    let report = FitReport {
        converged: minimum.converged,
        committed: true,
        chi_squared: reduced,
        degrees_of_freedom: dof,
        iterations: minimum.iterations,
        uncertainties,
    };
    Some((minimum, report))
}

/// Square roots of the diagonal of `(JᵀJ)⁻¹ · scale`; NaN when singular.
fn internal_uncertainties(problem: &dyn LeastSquares, params: &[f64], scale: f64) -> Vec<f64> {
    let jac = jacobian(problem, params);
    let normal = jac.transpose() * &jac;
    match normal.try_inverse() {
        Some(cov) => (0..params.len())
            .map(|i| (cov[(i, i)] * scale).max(0.0).sqrt())
            .collect(),
        None => vec![f64::NAN; params.len()],
    }
}

/// Which model parameter a free-vector slot drives.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Background(usize),
    Peak { peak: usize, param: usize },
    CommonWidth,
}

/// Sum of Hypermets over a polynomial background.
struct PeakProblem<'a> {
    x: &'a [f64],
    y: &'a [f64],
    sigma: Vec<f64>,
    peaks: Vec<Hypermet>,
    background: Polynomial,
    slots: Vec<(Slot, FitParam)>,
}

impl<'a> PeakProblem<'a> {
    fn new(
        x: &'a [f64],
        y: &'a [f64],
        peaks: &[Hypermet],
        background: &Polynomial,
        policy: WidthPolicy,
        settings: &FitSettings,
    ) -> Self {
        let len = x.len().min(y.len());
        let (x, y) = (&x[..len], &y[..len]);
        let mut slots: Vec<(Slot, FitParam)> = background
            .coeffs()
            .iter()
            .enumerate()
            .map(|(i, &c)| (Slot::Background(i), FitParam::free(c)))
            .collect();

        let common = policy == WidthPolicy::Common && !peaks.is_empty();
        for (i, peak) in peaks.iter().enumerate() {
            for (j, param) in peak.params().into_iter().enumerate() {
                if param.is_free() && !(common && j == WIDTH_INDEX) {
                    slots.push((Slot::Peak { peak: i, param: j }, *param));
                }
            }
        }
        if common {
            let mean = peaks.iter().map(|p| p.width.value).sum::<f64>() / peaks.len() as f64;
            let (lo, hi) = settings.width_common_bounds;
            slots.push((Slot::CommonWidth, FitParam::bounded(mean, mean * lo, mean * hi)));
        }

        Self {
            x,
            y,
            sigma: y.iter().map(|&c| c.max(1.0).sqrt()).collect(),
            peaks: peaks.to_vec(),
            background: background.clone(),
            slots,
        }
    }

    fn start(&self) -> Vec<f64> {
        self.slots.iter().map(|(_, p)| p.to_internal()).collect()
    }

    fn apply(&self, internal: &[f64], peaks: &mut [Hypermet], background: &mut Polynomial) {
        let mut coeffs = background.coeffs().to_vec();
        for ((slot, template), &theta) in self.slots.iter().zip(internal) {
            let value = template.from_internal(theta);
            match *slot {
                Slot::Background(i) => coeffs[i] = value,
                Slot::Peak { peak, param } => peaks[peak].params_mut()[param].value = value,
                Slot::CommonWidth => peaks.iter_mut().for_each(|p| p.width.value = value),
            }
        }
        background.set_coeffs(&coeffs);
    }

    /// Writes the solution into the caller's model and returns external
    /// uncertainties in slot order.
    fn commit(
        &self,
        internal: &[f64],
        internal_sigma: &[f64],
        peaks: &mut [Hypermet],
        background: &mut Polynomial,
    ) -> Vec<f64> {
        self.apply(internal, peaks, background);
        self.slots
            .iter()
            .zip(internal.iter().zip(internal_sigma))
            .map(|((slot, template), (&theta, &sigma))| {
                let h = 1e-7 * theta.abs().max(1.0);
                let slope =
                    (template.from_internal(theta + h) - template.from_internal(theta - h)) / (2.0 * h);
                let external = slope.abs() * sigma;
                match *slot {
                    Slot::Background(_) => {}
                    Slot::Peak { peak, param } => {
                        peaks[peak].params_mut()[param].uncertainty = external;
                    }
                    Slot::CommonWidth => {
                        peaks.iter_mut().for_each(|p| p.width.uncertainty = external);
                    }
                }
                external
            })
            .collect()
    }
}

impl LeastSquares for PeakProblem<'_> {
    fn residual_count(&self) -> usize {
        self.x.len()
    }

    fn residuals(&self, params: &[f64]) -> Vec<f64> {
        let mut peaks = self.peaks.clone();
        let mut background = self.background.clone();
        self.apply(params, &mut peaks, &mut background);
        self.x
            .iter()
            .zip(self.y)
            .zip(&self.sigma)
            .map(|((&x, &y), &sigma)| {
                let model = background.evaluate(x) + peaks.iter().map(|p| p.evaluate(x)).sum::<f64>();
                (y - model) / sigma
            })
            .collect()
    }
}

/// A calibration curve against points with uncertainties on both axes.
struct CurveProblem<'a, 'c> {
    curve: RefCell<&'c mut dyn Curve>,
    x: &'a [f64],
    y: &'a [f64],
    sigma_x: &'a [f64],
    sigma_y: &'a [f64],
}

impl LeastSquares for CurveProblem<'_, '_> {
    fn residual_count(&self) -> usize {
        self.x.len().min(self.y.len())
    }

    fn residuals(&self, params: &[f64]) -> Vec<f64> {
        let mut curve = self.curve.borrow_mut();
        curve.set_coeffs(params);
        (0..self.residual_count())
            .map(|i| {
                let (x, y) = (self.x[i], self.y[i]);
                let sx = self.sigma_x.get(i).copied().unwrap_or(0.0);
                let sy = self.sigma_y.get(i).copied().unwrap_or(1.0);
                let variance = sy * sy + (curve.derivative(x) * sx).powi(2);
                let sigma = if variance > 0.0 { variance.sqrt() } else { 1.0 };
                (y - curve.evaluate(x)) / sigma
            })
            .collect()
    }
}
