//! Bounded Levenberg–Marquardt for three-parameter curve models.
//!
//! Bounds are handled with a projected active set: a coefficient sitting on a bound whose
//! gradient points out of the feasible box is frozen for that iteration, the damped normal
//! equations are solved for the rest, and the candidate is clamped back into the box.
//! The 3×3 systems are solved with nalgebra's Cholesky, so no LAPACK is involved.

use nalgebra::{Matrix3, Vector3};
use tracing::trace;

const DIAG_FLOOR: f64 = 1e-12;
const MIN_DAMPING: f64 = 1e-15;
const MAX_DAMPING: f64 = 1e32;

/// A scalar curve `y = f(t; p)` with three coefficients.
pub trait CurveModel {
    fn value(&self, t: f64, p: &Vector3<f64>) -> f64;

    /// Partial derivatives of [`CurveModel::value`] with respect to `p`.
    fn gradient(&self, t: f64, p: &Vector3<f64>) -> Vector3<f64>;
}

/// `p2*t^2 + p1*t + p0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quadratic;

impl CurveModel for Quadratic {
    #[inline]
    fn value(&self, t: f64, p: &Vector3<f64>) -> f64 {
        super::params::quadratic(t, p[0], p[1], p[2])
    }

    #[inline]
    fn gradient(&self, t: f64, _p: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(1.0, t, t * t)
    }
}

/// Inclusive box constraints on the coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: Vector3<f64>,
    pub upper: Vector3<f64>,
}

impl Bounds {
    pub fn new(lower: [f64; 3], upper: [f64; 3]) -> Self {
        Self {
            lower: Vector3::from(lower),
            upper: Vector3::from(upper),
        }
    }

    pub fn clamp(&self, p: &Vector3<f64>) -> Vector3<f64> {
        Vector3::from_fn(|i, _| p[i].max(self.lower[i]).min(self.upper[i]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Iteration budget; running out is reported as [`SolveError::Timeout`].
    pub max_iterations: usize,
    /// Relative cost reduction below which an accepted step ends the solve.
    pub ftol: f64,
    /// Relative step length below which the solve ends.
    pub xtol: f64,
    /// Projected gradient magnitude below which the solve ends.
    pub gtol: f64,
    pub initial_damping: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_damping: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolveError {
    Singular,
    Timeout { iterations: usize },
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solution {
    pub params: Vector3<f64>,
    /// Half the sum of squared residuals at `params`.
    pub cost: f64,
    pub iterations: usize,
}

pub struct BoundedLevenbergMarquardt<M: CurveModel> {
    model: M,
    bounds: Bounds,
    options: SolverOptions,
}

impl<M: CurveModel> BoundedLevenbergMarquardt<M> {
    pub fn new(model: M, bounds: Bounds, options: SolverOptions) -> Self {
        Self {
            model,
            bounds,
            options,
        }
    }

    /// Minimize `0.5 * Σ (f(t_i; p) - y_i)^2` within the bounds, starting from `initial`.
    pub fn solve(
        &self,
        ts: &[f64],
        ys: &[f64],
        initial: Vector3<f64>,
    ) -> Result<Solution, SolveError> {
        let opts = &self.options;
        let mut p = self.bounds.clamp(&initial);
        let mut cost = self.cost(ts, ys, &p);
        if !cost.is_finite() {
            return Err(SolveError::NonFinite);
        }

        let mut damping = opts.initial_damping;
        for iteration in 1..=opts.max_iterations {
            let (jtj, grad) = self.normal_equations(ts, ys, &p);
            let free = self.free_mask(&p, &grad);
            let projected = Vector3::from_fn(|i, _| if free[i] { grad[i] } else { 0.0 });

            if cost == 0.0 || projected.amax() <= opts.gtol {
                return Ok(self.finish(p, cost, iteration));
            }

            // Frozen coefficients get an identity row so their step is exactly zero.
            let mut system = Matrix3::identity();
            for i in 0..3 {
                if !free[i] {
                    continue;
                }
                for j in 0..3 {
                    if free[j] {
                        system[(i, j)] = jtj[(i, j)];
                    }
                }
                system[(i, i)] += damping * jtj[(i, i)].max(DIAG_FLOOR);
            }

            let step = system
                .cholesky()
                .ok_or(SolveError::Singular)?
                .solve(&(-projected));
            if !step.iter().all(|v| v.is_finite()) {
                return Err(SolveError::Singular);
            }

            let candidate = self.bounds.clamp(&(p + step));
            let moved = (candidate - p).norm();
            let candidate_cost = self.cost(ts, ys, &candidate);

            if candidate_cost.is_finite() && candidate_cost < cost {
                let reduction = (cost - candidate_cost) / cost;
                p = candidate;
                cost = candidate_cost;
                damping = (damping / 10.0).max(MIN_DAMPING);
                if reduction <= opts.ftol {
                    return Ok(self.finish(p, cost, iteration));
                }
            } else {
                damping = (damping * 10.0).min(MAX_DAMPING);
            }

            if moved <= opts.xtol * (p.norm() + opts.xtol) {
                return Ok(self.finish(p, cost, iteration));
            }
        }

        Err(SolveError::Timeout {
            iterations: opts.max_iterations,
        })
    }

    fn finish(&self, params: Vector3<f64>, cost: f64, iterations: usize) -> Solution {
        trace!(iterations, cost, "bounded least squares converged");
        Solution {
            params,
            cost,
            iterations,
        }
    }

    fn cost(&self, ts: &[f64], ys: &[f64], p: &Vector3<f64>) -> f64 {
        0.5 * ts
            .iter()
            .zip(ys)
            .map(|(&t, &y)| {
                let r = self.model.value(t, p) - y;
                r * r
            })
            .sum::<f64>()
    }

    /// `(JᵀJ, Jᵀr)` at `p`.
    fn normal_equations(
        &self,
        ts: &[f64],
        ys: &[f64],
        p: &Vector3<f64>,
    ) -> (Matrix3<f64>, Vector3<f64>) {
        let mut jtj = Matrix3::zeros();
        let mut grad = Vector3::zeros();
        for (&t, &y) in ts.iter().zip(ys) {
            let j = self.model.gradient(t, p);
            let r = self.model.value(t, p) - y;
            jtj += j * j.transpose();
            grad += j * r;
        }
        (jtj, grad)
    }

    /// Coefficients that may move this iteration: not pinned against a bound by the gradient.
    fn free_mask(&self, p: &Vector3<f64>, grad: &Vector3<f64>) -> [bool; 3] {
        std::array::from_fn(|i| {
            let at_lower = p[i] <= self.bounds.lower[i] && grad[i] > 0.0;
            let at_upper = p[i] >= self.bounds.upper[i] && grad[i] < 0.0;
            !(at_lower || at_upper)
        })
    }
}
