//! Nelder-Mead downhill simplex backend.

use super::{chi_squared, LeastSquares, Minimum, Optimizer};

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Derivative-free simplex search.
///
/// Slower than [`super::LevenbergMarquardt`] but insensitive to noisy or
/// flat Jacobians. `max_iterations` is scaled by the number of vertices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NelderMead {
    /// Relative size of the initial simplex.
    pub initial_step: f64,
    /// Spread of χ² across the simplex, relative to `1 + χ²`, at which the
    /// search stops.
    pub tolerance: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            initial_step: 0.1,
            tolerance: 1e-10,
        }
    }
}

fn objective(problem: &dyn LeastSquares, params: &[f64]) -> f64 {
    let chi = chi_squared(&problem.residuals(params));
    if chi.is_nan() {
        f64::INFINITY
    } else {
        chi
    }
}

fn toward(from: &[f64], to: &[f64], factor: f64) -> Vec<f64> {
    from.iter().zip(to).map(|(f, t)| f + factor * (t - f)).collect()
}

impl Optimizer for NelderMead {
    fn name(&self) -> &'static str {
        "nelder-mead"
    }

    fn minimize(
        &self,
        problem: &dyn LeastSquares,
        start: &[f64],
        max_iterations: usize,
    ) -> Minimum {
        let n = start.len();
        let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
        simplex.push((start.to_vec(), objective(problem, start)));
        for i in 0..n {
            let mut vertex = start.to_vec();
            vertex[i] += self.initial_step * vertex[i].abs().max(1.0);
            let value = objective(problem, &vertex);
            simplex.push((vertex, value));
        }

        let budget = max_iterations.saturating_mul(n + 1);
        let mut iterations = 0;
        let mut converged = n == 0;
        while iterations < budget && !converged {
            iterations += 1;
            simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
            let (best, worst) = (simplex[0].1, simplex[n].1);
            if !best.is_finite() {
                break;
            }
            if worst - best <= self.tolerance * (best.abs() + 1.0) {
                converged = true;
                break;
            }

            let mut centroid = vec![0.0; n];
            for (vertex, _) in &simplex[..n] {
                for (c, v) in centroid.iter_mut().zip(vertex) {
                    *c += v / n as f64;
                }
            }

            let reflected = toward(&centroid, &simplex[n].0, -REFLECT);
            let reflected_value = objective(problem, &reflected);
            if reflected_value < best {
                let expanded = toward(&centroid, &reflected, EXPAND);
                let expanded_value = objective(problem, &expanded);
                simplex[n] = if expanded_value < reflected_value {
                    (expanded, expanded_value)
                } else {
                    (reflected, reflected_value)
                };
                continue;
            }
            if reflected_value < simplex[n - 1].1 {
                simplex[n] = (reflected, reflected_value);
                continue;
            }

            let (contracted, limit) = if reflected_value < worst {
                (toward(&centroid, &reflected, CONTRACT), reflected_value)
            } else {
                (toward(&centroid, &simplex[n].0, CONTRACT), worst)
            };
            let contracted_value = objective(problem, &contracted);
            if contracted_value < limit {
                simplex[n] = (contracted, contracted_value);
                continue;
            }

            let anchor = simplex[0].0.clone();
            for entry in &mut simplex[1..] {
                let vertex = toward(&anchor, &entry.0, SHRINK);
                let value = objective(problem, &vertex);
                *entry = (vertex, value);
            }
        }

        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (params, value) = simplex.swap_remove(0);
        Minimum {
            params,
            chi_squared: value,
            iterations,
            converged,
        }
    }
}
