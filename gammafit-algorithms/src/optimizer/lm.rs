//! Levenberg-Marquardt backend.

use nalgebra::DVector;

use super::{chi_squared, jacobian, LeastSquares, Minimum, Optimizer};

const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e12;
/// Floor for the diagonal scaling of parameters with a flat gradient.
const MIN_DIAGONAL: f64 = 1e-9;

/// Damped Gauss-Newton with Marquardt's diagonal scaling.
///
/// Each iteration solves `(JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr` and accepts the
/// step if χ² does not increase, relaxing λ; otherwise λ grows tenfold.
/// The search stops when the relative χ² decrease falls below
/// `tolerance` or no damping yields a downhill step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevenbergMarquardt {
    pub initial_damping: f64,
    pub tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            initial_damping: 1e-3,
            tolerance: 1e-10,
        }
    }
}

impl Optimizer for LevenbergMarquardt {
    fn name(&self) -> &'static str {
        "levenberg-marquardt"
    }

    fn minimize(
        &self,
        problem: &dyn LeastSquares,
        start: &[f64],
        max_iterations: usize,
    ) -> Minimum {
        let mut params = start.to_vec();
        let mut residuals = problem.residuals(&params);
        let mut chi = chi_squared(&residuals);
        let mut iterations = 0;
        let mut converged = false;
        if !chi.is_finite() || params.is_empty() {
            return Minimum {
                params,
                chi_squared: chi,
                iterations,
                converged,
            };
        }

        let mut lambda = self.initial_damping;
        while iterations < max_iterations && !converged {
            iterations += 1;
            let jac = jacobian(problem, &params);
            let normal = jac.transpose() * &jac;
            let gradient = jac.transpose() * DVector::from_column_slice(&residuals);
            if gradient.amax() <= self.tolerance {
                converged = true;
                break;
            }

            let mut stepped = false;
            while lambda <= MAX_DAMPING {
                let mut damped = normal.clone();
                for i in 0..params.len() {
                    damped[(i, i)] += lambda * normal[(i, i)].max(MIN_DIAGONAL);
                }
                let Some(step) = damped.lu().solve(&(-&gradient)) else {
                    lambda *= 10.0;
                    continue;
                };
                let trial: Vec<f64> = params.iter().zip(step.iter()).map(|(p, s)| p + s).collect();
                let trial_residuals = problem.residuals(&trial);
                let trial_chi = chi_squared(&trial_residuals);
                if trial_chi.is_finite() && trial_chi <= chi {
                    converged = chi - trial_chi <= self.tolerance * chi;
                    params = trial;
                    residuals = trial_residuals;
                    chi = trial_chi;
                    lambda = (lambda / 10.0).max(MIN_DAMPING);
                    stepped = true;
                    break;
                }
                lambda *= 10.0;
            }
            if !stepped {
                // no downhill direction at any damping: local minimum
                converged = true;
            }
        }

        Minimum {
            params,
            chi_squared: chi,
            iterations,
            converged,
        }
    }
}
